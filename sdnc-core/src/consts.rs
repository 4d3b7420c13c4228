//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

// Switch-side flow timeouts. The installed flow expires quickly so the
// switch forgets fast while the controller keeps the mapping alive for
// `FLOW_MEMORY_TIMEOUT` in case the same client reconnects.
pub const FLOW_IDLE_TIMEOUT: Duration = Duration::from_secs(10);
pub const FLOW_HARD_TIMEOUT_PERMANENT: u16 = 0;

// Learning-switch flow timeouts and the same-port echo drop flow.
pub const LEARNING_IDLE_TIMEOUT: u16 = 10;
pub const LEARNING_HARD_TIMEOUT: u16 = 30;
pub const LEARNING_SAME_PORT_DROP_TIMEOUT: u16 = 10;

// How long the memory table keeps a LB flow's backend selection around
// after the switch itself has forgotten the flow.
pub const FLOW_MEMORY_TIMEOUT: Duration = Duration::from_secs(300);

// ARP-probe liveness engine.
pub const PROBE_CYCLE_TIME: Duration = Duration::from_secs(5);
pub const ARP_TIMEOUT: Duration = Duration::from_secs(3);
pub const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(250);

// Cross-switch liveness reconciler sweep interval.
pub const RECONCILER_INTERVAL: Duration = Duration::from_secs(10);

// Default hold-down period before a freshly connected learning switch will
// flood unknown destinations, avoiding a burst of floods while the network
// is still converging after a switch (re)connects.
pub const DEFAULT_HOLD_DOWN: Duration = Duration::from_secs(0);

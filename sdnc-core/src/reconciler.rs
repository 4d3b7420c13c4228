//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

// Cross-switch liveness reconciler: periodically reconciles every
// `LearningSwitch`'s `macToPort` table against host-level reachability,
// restoring entries at the last port that specific MAC was observed on
// rather than a global "last frame from anywhere" tracer. Restores the
// corrected per-host-port behavior called for in place of the reference
// implementation's shared-global tracking.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use sdnc_utils::mac::MacAddr;
use tracing::{debug, info};

// External reachability collaborator. The default implementation probes
// with a short-timeout TCP connect, since portable unprivileged ICMP is not
// available without raw sockets or elevated capabilities (see DESIGN.md).
#[async_trait]
pub trait LivenessOracle: Send + Sync {
    async fn is_reachable(&self, ip: Ipv4Addr) -> bool;
}

// Per-host bookkeeping the reconciler needs across sweeps: the canonical
// MAC for the host, and the port it was last observed at on each switch
// before being pruned (so a later "reachable" transition restores it at
// the same port instead of a stale or arbitrary one).
#[derive(Debug, Default)]
pub struct HostTracker {
    known_hosts: HashMap<Ipv4Addr, MacAddr>,
    last_port: HashMap<(u64, Ipv4Addr), u16>,
}

impl HostTracker {
    pub fn new(known_hosts: HashMap<Ipv4Addr, MacAddr>) -> Self {
        HostTracker {
            known_hosts,
            last_port: HashMap::new(),
        }
    }

    pub fn record_port(&mut self, dpid: u64, ip: Ipv4Addr, port: u16) {
        self.last_port.insert((dpid, ip), port);
    }

    pub fn last_port_for(&self, dpid: u64, ip: Ipv4Addr) -> Option<u16> {
        self.last_port.get(&(dpid, ip)).copied()
    }
}

pub enum ReconcileAction {
    // Restore `mac` at `port` on the switch with this `dpid`.
    Insert { dpid: u64, mac: MacAddr, port: u16 },
    // Remove `mac` from the switch with this `dpid`; `port` is what it was
    // removed from, recorded so a later restore uses the same port.
    Remove { dpid: u64, mac: MacAddr, port: u16 },
}

// One sweep (§4.7): for each known host IP, given its reachability and the
// current `mac_to_port` table of each switch, compute the set of
// insertions/removals needed to converge the tables with reality.
pub fn reconcile(
    tracker: &mut HostTracker,
    reachability: &HashMap<Ipv4Addr, bool>,
    switches: &HashMap<u64, HashMap<MacAddr, u16>>,
) -> Vec<ReconcileAction> {
    let mut actions = Vec::new();
    let known_hosts: Vec<(Ipv4Addr, MacAddr)> =
        tracker.known_hosts.iter().map(|(&ip, &mac)| (ip, mac)).collect();
    for (ip, mac) in known_hosts {
        let reachable = reachability.get(&ip).copied().unwrap_or(false);
        for (&dpid, mac_to_port) in switches {
            let present = mac_to_port.contains_key(&mac);
            if reachable && !present {
                if let Some(port) = tracker.last_port_for(dpid, ip) {
                    info!(dpid, %mac, port, "reconciler: restoring host");
                    actions.push(ReconcileAction::Insert { dpid, mac, port });
                } else {
                    debug!(dpid, %mac, "reconciler: no prior port to restore");
                }
            } else if !reachable && present {
                let port = mac_to_port[&mac];
                tracker.record_port(dpid, ip, port);
                info!(dpid, %mac, port, "reconciler: pruning unreachable host");
                actions.push(ReconcileAction::Remove { dpid, mac, port });
            }
        }
    }
    actions
}

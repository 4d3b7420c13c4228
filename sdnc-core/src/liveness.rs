//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

// ARP-probe liveness engine: round-robin probes a configured server pool
// and declares a server up or down based on whether an ARP reply arrives
// before a per-probe deadline. Driven entirely by the scheduler (§4.1); the
// probe loop and reply handler are both plain synchronous functions called
// from the single controller task, so no locking is needed here.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Instant;

use sdnc_utils::mac::MacAddr;
use tracing::{debug, info};

use crate::consts::{ARP_TIMEOUT, MIN_PROBE_INTERVAL, PROBE_CYCLE_TIME};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LiveServer {
    pub mac: MacAddr,
    pub port: u16,
}

// Tracks liveness for a configured server pool. `live_order` records the
// order in which servers most recently became live; the LB's round-robin
// cursor (see `lb.rs`) indexes into it, per the spec's requirement that
// `live_servers.keys()` have deterministic, insertion-ordered iteration.
#[derive(Debug, Default)]
pub struct LivenessEngine {
    configured: Vec<Ipv4Addr>,
    next_to_probe: usize,
    live_order: Vec<Ipv4Addr>,
    live_servers: HashMap<Ipv4Addr, LiveServer>,
    outstanding_probes: HashMap<Ipv4Addr, Instant>,
}

pub enum LivenessEvent {
    ServerUp(Ipv4Addr, LiveServer),
    ServerDown(Ipv4Addr),
}

impl LivenessEngine {
    pub fn new(configured: Vec<Ipv4Addr>) -> Self {
        LivenessEngine {
            configured,
            next_to_probe: 0,
            live_order: Vec::new(),
            live_servers: HashMap::new(),
            outstanding_probes: HashMap::new(),
        }
    }

    pub fn live_servers(&self) -> &HashMap<Ipv4Addr, LiveServer> {
        &self.live_servers
    }

    // Insertion-ordered view used by the LB's round-robin cursor.
    pub fn live_order(&self) -> &[Ipv4Addr] {
        &self.live_order
    }

    pub fn is_live(&self, ip: &Ipv4Addr) -> bool {
        self.live_servers.contains_key(ip)
    }

    // Step 5 of §4.4: at most four probes per second, otherwise one full
    // sweep of the configured pool every `probe_cycle_time`.
    pub fn probe_interval(&self) -> std::time::Duration {
        if self.configured.is_empty() {
            return PROBE_CYCLE_TIME;
        }
        let per_server = PROBE_CYCLE_TIME / self.configured.len() as u32;
        per_server.max(MIN_PROBE_INTERVAL)
    }

    // Expiry sweep (§4.4 step 1): drops any probe whose deadline has
    // passed, and with it the server's liveness, returning the events so
    // the caller can log and react (e.g. reassign clients).
    pub fn expire(&mut self, now: Instant) -> Vec<LivenessEvent> {
        let expired: Vec<Ipv4Addr> = self
            .outstanding_probes
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(ip, _)| *ip)
            .collect();
        let mut events = Vec::new();
        for ip in expired {
            self.outstanding_probes.remove(&ip);
            if self.live_servers.remove(&ip).is_some() {
                self.live_order.retain(|live| *live != ip);
                info!(server = %ip, "server down");
                events.push(LivenessEvent::ServerDown(ip));
            }
        }
        events
    }

    // Selects the next server to probe, rotating the configured list in
    // stable circular order (step 2). Returns `None` if no servers are
    // configured at all.
    pub fn next_probe_target(&mut self) -> Option<Ipv4Addr> {
        if self.configured.is_empty() {
            return None;
        }
        let target = self.configured[self.next_to_probe % self.configured.len()];
        self.next_to_probe = (self.next_to_probe + 1) % self.configured.len();
        Some(target)
    }

    pub fn mark_probed(&mut self, target: Ipv4Addr, now: Instant) {
        self.outstanding_probes.insert(target, now + ARP_TIMEOUT);
    }

    // Reply handler (§4.4): an ARP reply from an address with no
    // outstanding probe is unsolicited and ignored by this engine (it may
    // still be processed elsewhere, e.g. by the learning switch).
    pub fn handle_arp_reply(
        &mut self,
        sender_ip: Ipv4Addr,
        sender_mac: MacAddr,
        ingress_port: u16,
    ) -> Option<LivenessEvent> {
        if self.outstanding_probes.remove(&sender_ip).is_none() {
            debug!(server = %sender_ip, "ignoring unsolicited ARP reply");
            return None;
        }
        let candidate = LiveServer {
            mac: sender_mac,
            port: ingress_port,
        };
        let changed = self.live_servers.get(&sender_ip) != Some(&candidate);
        if !self.live_servers.contains_key(&sender_ip) {
            self.live_order.push(sender_ip);
        }
        self.live_servers.insert(sender_ip, candidate);
        if changed {
            info!(server = %sender_ip, port = ingress_port, "server up");
            Some(LivenessEvent::ServerUp(sender_ip, candidate))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_rotation_is_circular_and_stable() {
        let mut engine = LivenessEngine::new(vec![
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
        ]);
        assert_eq!(engine.next_probe_target(), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(engine.next_probe_target(), Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(engine.next_probe_target(), Some(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn reply_before_deadline_marks_server_up() {
        let mut engine = LivenessEngine::new(vec![Ipv4Addr::new(10, 0, 0, 1)]);
        let now = Instant::now();
        let target = engine.next_probe_target().unwrap();
        engine.mark_probed(target, now);

        let event = engine.handle_arp_reply(
            target,
            MacAddr::from([0, 0, 0, 0, 0, 9]),
            3,
        );
        assert!(matches!(event, Some(LivenessEvent::ServerUp(_, _))));
        assert!(engine.is_live(&target));
    }

    #[test]
    fn expired_probe_without_reply_marks_server_down() {
        let mut engine = LivenessEngine::new(vec![Ipv4Addr::new(10, 0, 0, 1)]);
        let now = Instant::now();
        let target = engine.next_probe_target().unwrap();
        engine.mark_probed(target, now);
        engine.handle_arp_reply(target, MacAddr::from([0, 0, 0, 0, 0, 9]), 3);
        assert!(engine.is_live(&target));

        engine.mark_probed(target, now);
        let events = engine.expire(now + ARP_TIMEOUT + std::time::Duration::from_secs(1));
        assert!(matches!(events.as_slice(), [LivenessEvent::ServerDown(ip)] if *ip == target));
        assert!(!engine.is_live(&target));
    }

    #[test]
    fn unsolicited_reply_is_ignored() {
        let mut engine = LivenessEngine::new(vec![Ipv4Addr::new(10, 0, 0, 1)]);
        let event = engine.handle_arp_reply(
            Ipv4Addr::new(10, 0, 0, 1),
            MacAddr::from([0, 0, 0, 0, 0, 9]),
            3,
        );
        assert!(event.is_none());
        assert!(!engine.is_live(&Ipv4Addr::new(10, 0, 0, 1)));
    }
}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

// Dual-keyed flow memory table: the controller must recognize both
// directions of a TCP flow (client-to-service and server-to-client) as the
// same backend-selection decision, even though the switch-side match is
// direction-specific.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Instant;

use sdnc_utils::mac::MacAddr;

use crate::consts::FLOW_MEMORY_TIMEOUT;

// `key1 = (clientIP, serviceIP, clientPort, servicePort)`, derived from the
// client-to-service direction of the flow.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Key1 {
    pub client_ip: Ipv4Addr,
    pub service_ip: Ipv4Addr,
    pub client_port: u16,
    pub service_port: u16,
}

// `key2 = (serverIP, clientIP, servicePort, clientPort)`, derived from the
// server-to-client direction of the same flow.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Key2 {
    pub server_ip: Ipv4Addr,
    pub client_ip: Ipv4Addr,
    pub server_port: u16,
    pub client_port: u16,
}

impl Key1 {
    pub fn reverse(&self, server_ip: Ipv4Addr) -> Key2 {
        Key2 {
            server_ip,
            client_ip: self.client_ip,
            server_port: self.service_port,
            client_port: self.client_port,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MemoryEntry {
    pub server_ip: Ipv4Addr,
    pub server_mac: MacAddr,
    pub client_port: u16,
    pub client_mac: MacAddr,
    pub expiration: Instant,
    // The reverse key this entry is filed under, so a later `insert` that
    // overwrites this `key1` (a dead-server reassignment) can unlink the
    // stale `key2_to_key1` entry instead of leaking it.
    pub(crate) key2: Key2,
}

// Stores each live entry under both its forward and reverse key so either
// half of a TCP flow resolves to the same backend-selection decision.
#[derive(Debug, Default)]
pub struct FlowMemory {
    by_key1: HashMap<Key1, MemoryEntry>,
    key2_to_key1: HashMap<Key2, Key1>,
}

impl FlowMemory {
    pub fn new() -> Self {
        Self::default()
    }

    // §4.3: removal must unlink both keys, and that includes re-pointing a
    // still-live `key1` at a new server (a dead-server reassignment): the
    // old `key2` is evicted from `key2_to_key1` first so it never outlives
    // the entry it used to point at.
    pub fn insert(&mut self, key1: Key1, key2: Key2, entry: MemoryEntry) {
        if let Some(old) = self.by_key1.get(&key1) {
            self.key2_to_key1.remove(&old.key2);
        }
        self.key2_to_key1.insert(key2, key1);
        self.by_key1.insert(key1, entry);
    }

    pub fn get_by_key1(&self, key: &Key1) -> Option<&MemoryEntry> {
        self.by_key1.get(key)
    }

    pub fn get_by_key2(&self, key: &Key2) -> Option<(&Key1, &MemoryEntry)> {
        let key1 = self.key2_to_key1.get(key)?;
        self.by_key1.get(key1).map(|entry| (key1, entry))
    }

    // Bumps a live entry's expiration forward, matching the "refresh on
    // every matching packet in either direction" rule.
    pub fn refresh(&mut self, key1: &Key1, now: Instant) {
        if let Some(entry) = self.by_key1.get_mut(key1) {
            entry.expiration = now + FLOW_MEMORY_TIMEOUT;
        }
    }

    // Removes every entry (and its reverse key) whose expiration has
    // passed. Called by the liveness engine's expiry sweep (§4.4 step 1).
    pub fn expire(&mut self, now: Instant) {
        let expired: Vec<Key1> = self
            .by_key1
            .iter()
            .filter(|(_, entry)| entry.expiration < now)
            .map(|(key1, _)| *key1)
            .collect();
        for key1 in expired {
            self.by_key1.remove(&key1);
        }
        self.key2_to_key1.retain(|_, k1| self.by_key1.contains_key(k1));
    }

    pub fn len(&self) -> usize {
        self.by_key1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key1.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(server_ip: Ipv4Addr, key2: Key2, expiration: Instant) -> MemoryEntry {
        MemoryEntry {
            server_ip,
            server_mac: MacAddr::from([0, 0, 0, 0, 0, 1]),
            client_port: 5000,
            client_mac: MacAddr::from([0, 0, 0, 0, 0, 2]),
            expiration,
            key2,
        }
    }

    #[test]
    fn insert_is_reachable_under_both_keys() {
        let mut mem = FlowMemory::new();
        let key1 = Key1 {
            client_ip: Ipv4Addr::new(10, 0, 0, 1),
            service_ip: Ipv4Addr::new(10, 0, 0, 100),
            client_port: 5000,
            service_port: 80,
        };
        let key2 = key1.reverse(Ipv4Addr::new(10, 0, 0, 5));
        let now = Instant::now();
        mem.insert(key1, key2, entry(Ipv4Addr::new(10, 0, 0, 5), key2, now));

        assert!(mem.get_by_key1(&key1).is_some());
        let (found_key1, found) = mem.get_by_key2(&key2).unwrap();
        assert_eq!(*found_key1, key1);
        assert_eq!(found.server_ip, Ipv4Addr::new(10, 0, 0, 5));
    }

    #[test]
    fn expire_removes_both_keys() {
        let mut mem = FlowMemory::new();
        let key1 = Key1 {
            client_ip: Ipv4Addr::new(10, 0, 0, 1),
            service_ip: Ipv4Addr::new(10, 0, 0, 100),
            client_port: 5000,
            service_port: 80,
        };
        let key2 = key1.reverse(Ipv4Addr::new(10, 0, 0, 5));
        let past = Instant::now() - std::time::Duration::from_secs(1);
        mem.insert(key1, key2, entry(Ipv4Addr::new(10, 0, 0, 5), key2, past));

        mem.expire(Instant::now());

        assert!(mem.get_by_key1(&key1).is_none());
        assert!(mem.get_by_key2(&key2).is_none());
        assert!(mem.is_empty());
    }

    #[test]
    fn refresh_extends_expiration() {
        let mut mem = FlowMemory::new();
        let key1 = Key1 {
            client_ip: Ipv4Addr::new(10, 0, 0, 1),
            service_ip: Ipv4Addr::new(10, 0, 0, 100),
            client_port: 5000,
            service_port: 80,
        };
        let key2 = key1.reverse(Ipv4Addr::new(10, 0, 0, 5));
        let now = Instant::now();
        mem.insert(key1, key2, entry(Ipv4Addr::new(10, 0, 0, 5), key2, now));

        let later = now + std::time::Duration::from_secs(600);
        mem.refresh(&key1, later);
        assert!(mem.get_by_key1(&key1).unwrap().expiration > now);
    }

    #[test]
    fn reinsert_at_same_key1_unlinks_the_old_key2() {
        let mut mem = FlowMemory::new();
        let key1 = Key1 {
            client_ip: Ipv4Addr::new(10, 0, 0, 1),
            service_ip: Ipv4Addr::new(10, 0, 0, 100),
            client_port: 5000,
            service_port: 80,
        };
        let now = Instant::now();
        let old_key2 = key1.reverse(Ipv4Addr::new(10, 0, 0, 5));
        mem.insert(key1, old_key2, entry(Ipv4Addr::new(10, 0, 0, 5), old_key2, now));

        // The server behind key1 died and a new one was picked: re-insert
        // at the same key1 with a key2 pointing at the new server.
        let new_key2 = key1.reverse(Ipv4Addr::new(10, 0, 0, 6));
        mem.insert(key1, new_key2, entry(Ipv4Addr::new(10, 0, 0, 6), new_key2, now));

        assert!(
            mem.get_by_key2(&old_key2).is_none(),
            "stale key2 from the dead server must not remain reachable"
        );
        let (found_key1, found) = mem.get_by_key2(&new_key2).unwrap();
        assert_eq!(*found_key1, key1);
        assert_eq!(found.server_ip, Ipv4Addr::new(10, 0, 0, 6));
        assert_eq!(mem.len(), 1);
    }
}

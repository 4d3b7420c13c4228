//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

// Tracks the connected switches and the per-switch state machines bound to
// them. Owned exclusively by the controller task; every other task reaches
// it only by sending a message, preserving the single-writer property
// described for `macToPort`/`live_servers`/flow memory.

use std::collections::HashMap;
use std::time::Instant;

use sdnc_utils::mac::MacAddr;

use crate::lb::{LbConfig, LbInstance};
use crate::learning::LearningSwitch;

pub struct SwitchState {
    pub dpid: u64,
    pub switch_mac: MacAddr,
    pub lb: Option<LbInstance>,
    pub learning: Option<LearningSwitch>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    switches: HashMap<u64, SwitchState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // §6: ConnectionUp — binds whichever of the LB / learning-switch state
    // machines this dpid is configured for.
    pub fn connection_up(
        &mut self,
        dpid: u64,
        switch_mac: MacAddr,
        lb_config: Option<LbConfig>,
        learning_enabled: bool,
        transparent: bool,
        hold_down: std::time::Duration,
        now: Instant,
    ) {
        let lb = lb_config.map(LbInstance::new);
        let learning = learning_enabled
            .then(|| LearningSwitch::new(dpid, transparent, hold_down, now));
        self.switches.insert(
            dpid,
            SwitchState {
                dpid,
                switch_mac,
                lb,
                learning,
            },
        );
    }

    pub fn connection_down(&mut self, dpid: u64) {
        self.switches.remove(&dpid);
    }

    pub fn get(&self, dpid: u64) -> Option<&SwitchState> {
        self.switches.get(&dpid)
    }

    pub fn get_mut(&mut self, dpid: u64) -> Option<&mut SwitchState> {
        self.switches.get_mut(&dpid)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SwitchState> {
        self.switches.values_mut()
    }

    pub fn dpids(&self) -> impl Iterator<Item = u64> + '_ {
        self.switches.keys().copied()
    }

    pub fn mac_to_port_snapshot(&self, dpid: u64) -> HashMap<MacAddr, u16> {
        self.switches
            .get(&dpid)
            .and_then(|s| s.learning.as_ref())
            .map(|l| l.mac_to_port.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_up_then_down_clears_state() {
        let mut registry = ConnectionRegistry::new();
        registry.connection_up(
            1,
            MacAddr::from([0, 0, 0, 0, 0, 1]),
            None,
            true,
            false,
            std::time::Duration::ZERO,
            Instant::now(),
        );
        assert!(registry.get(1).is_some());
        registry.connection_down(1);
        assert!(registry.get(1).is_none());
    }
}

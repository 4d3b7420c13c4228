//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

// Per-switch L2 learning switch: the classic learning-bridge state machine,
// plus the hold-down period and same-port echo guard that the reference
// implementation adds on top.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use sdnc_utils::mac::MacAddr;
use tracing::debug;

use crate::consts::{
    LEARNING_HARD_TIMEOUT, LEARNING_IDLE_TIMEOUT, LEARNING_SAME_PORT_DROP_TIMEOUT,
};
use crate::openflow::{
    flow_mod_add_with_timeouts, packet_out_drop, FlowMod, OfAction, OfMatch, OutputPort,
};
use crate::packet::{EthernetFrame, ETHERTYPE_LLDP};

pub enum LearningAction {
    FlowMod(FlowMod),
    PacketOut(crate::openflow::PacketOut),
    None,
}

#[derive(Debug)]
pub struct LearningSwitch {
    pub dpid: u64,
    pub transparent: bool,
    pub mac_to_port: HashMap<MacAddr, u16>,
    connected_at: Instant,
    hold_down: Duration,
}

impl LearningSwitch {
    pub fn new(dpid: u64, transparent: bool, hold_down: Duration, now: Instant) -> Self {
        LearningSwitch {
            dpid,
            transparent,
            mac_to_port: HashMap::new(),
            connected_at: now,
            hold_down,
        }
    }

    fn hold_down_expired(&self, now: Instant) -> bool {
        now.duration_since(self.connected_at) >= self.hold_down
    }

    // §4.6: the learning-switch packet-in state machine.
    pub fn handle_packet_in(
        &mut self,
        in_port: u16,
        eth: &EthernetFrame,
        raw: Bytes,
        now: Instant,
    ) -> LearningAction {
        // Step 1: learn the source regardless of what happens next.
        self.mac_to_port.insert(eth.src, in_port);

        // Step 2: drop LLDP and bridge-filtered multicast outright unless
        // running in transparent mode.
        if !self.transparent
            && (eth.ethertype == ETHERTYPE_LLDP || eth.dst.is_bridge_filtered())
        {
            debug!(dpid = self.dpid, "dropping bridge-reserved frame");
            return LearningAction::PacketOut(packet_out_drop(self.dpid));
        }

        // Step 3: flood multicast/broadcast destinations.
        if eth.dst.is_multicast() {
            return LearningAction::PacketOut(crate::openflow::packet_out_flood(
                self.dpid, raw,
            ));
        }

        let Some(&out_port) = self.mac_to_port.get(&eth.dst) else {
            // Step 4: unknown destination, flood — but hold down floods for
            // a configured grace period right after connecting.
            if self.hold_down_expired(now) {
                return LearningAction::PacketOut(crate::openflow::packet_out_flood(
                    self.dpid, raw,
                ));
            }
            debug!(dpid = self.dpid, "holding down flood");
            return LearningAction::PacketOut(packet_out_drop(self.dpid));
        };

        // Step 5: the learned port echoes the ingress port — install a
        // short drop flow instead of looping the frame back out.
        if out_port == in_port {
            debug!(dpid = self.dpid, port = in_port, "same-port echo, dropping");
            let r#match = OfMatch::from_packet(eth, in_port);
            return LearningAction::FlowMod(flow_mod_add_with_timeouts(
                self.dpid,
                r#match,
                Vec::new(),
                None,
                LEARNING_SAME_PORT_DROP_TIMEOUT,
                0,
            ));
        }

        // Step 6: install a normal forwarding flow.
        let r#match = OfMatch::from_packet(eth, in_port);
        LearningAction::FlowMod(flow_mod_add_with_timeouts(
            self.dpid,
            r#match,
            vec![OfAction::Output(OutputPort::Port(out_port))],
            Some(raw),
            LEARNING_IDLE_TIMEOUT,
            LEARNING_HARD_TIMEOUT,
        ))
    }
}

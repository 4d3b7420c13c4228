//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

// Per-switch, per-service IP load-balancer instance: owns the server pool's
// liveness state, the flow-memory table, and the round-robin cursor used to
// spread new flows across live backends. All mutation happens inline from
// packet-in handling or scheduler callbacks on the single controller task.

use std::net::Ipv4Addr;
use std::time::Instant;

use bytes::Bytes;
use sdnc_utils::mac::MacAddr;
use tracing::{debug, warn};

use crate::consts::FLOW_MEMORY_TIMEOUT;
use crate::flowmem::{FlowMemory, Key1, Key2, MemoryEntry};
use crate::liveness::{LivenessEngine, LivenessEvent};
use crate::openflow::{
    flow_mod_add, packet_out_drop, packet_out_unicast, FlowMod, OfAction, OfMatch, OutputPort,
};
use crate::packet::{ArpPacket, EthernetFrame, ParsedFrame, ETHERTYPE_ARP};

#[derive(Clone, Debug)]
pub struct LbConfig {
    pub service_ip: Ipv4Addr,
    pub servers: Vec<Ipv4Addr>,
    pub switch_dpid: u64,
    pub switch_mac: MacAddr,
}

#[derive(Debug)]
pub struct LbInstance {
    pub config: LbConfig,
    pub liveness: LivenessEngine,
    pub memory: FlowMemory,
    cursor: usize,
    // §4.4 step 5: this instance's own next probe deadline, so a daemon
    // running several bindings of different pool sizes probes each at its
    // own `probe_interval()` rather than all of them at whichever binding's
    // interval happens to be shortest.
    next_probe_at: Option<Instant>,
}

// Outcome of handling a packet-in, telling the caller what to emit on the
// southbound connection. `None` means "no action" (§4.5 step 5).
pub enum LbAction {
    FlowMod(FlowMod),
    PacketOut(crate::openflow::PacketOut),
    None,
}

impl LbInstance {
    pub fn new(config: LbConfig) -> Self {
        let liveness = LivenessEngine::new(config.servers.clone());
        LbInstance {
            config,
            liveness,
            memory: FlowMemory::new(),
            cursor: 0,
            next_probe_at: None,
        }
    }

    pub fn is_configured_server(&self, ip: Ipv4Addr) -> bool {
        self.config.servers.contains(&ip)
    }

    // §4.5: the LB packet-in state machine. `in_port` is the ingress port,
    // `eth` the parsed Ethernet frame, `raw` the original buffered bytes to
    // carry along as flow-mod/packet-out payload.
    pub fn handle_packet_in(
        &mut self,
        in_port: u16,
        eth: &EthernetFrame,
        raw: Bytes,
        now: Instant,
    ) -> LbAction {
        match crate::packet::classify(eth) {
            ParsedFrame::Arp(arp) => self.handle_arp(arp, in_port),
            ParsedFrame::Tcp { ip, tcp } if self.is_configured_server(ip.src) => {
                self.handle_from_server(eth, in_port, ip.src, ip.dst, tcp.src_port, tcp.dst_port, raw)
            }
            ParsedFrame::Tcp { ip, tcp } if ip.dst == self.config.service_ip => {
                self.handle_to_service(eth, in_port, ip.src, tcp.src_port, tcp.dst_port, raw, now)
            }
            ParsedFrame::Tcp { .. } => LbAction::None,
            ParsedFrame::Other => {
                debug!("dropping non-TCP non-ARP packet-in");
                LbAction::PacketOut(packet_out_drop(self.config.switch_dpid))
            }
        }
    }

    // §6A: the ARP-responder collaborator, folded inline. A request for the
    // service IP is answered directly with the switch's own MAC
    // (`eat_packets=false`: the request still reached the controller here,
    // it just never reaches a server); everything else falls through to
    // liveness-reply handling.
    fn handle_arp(&mut self, arp: ArpPacket, in_port: u16) -> LbAction {
        match arp.operation {
            crate::packet::ArpOp::Request if arp.target_ip == self.config.service_ip => {
                let reply = ArpPacket::reply(
                    self.config.switch_mac,
                    self.config.service_ip,
                    arp.sender_mac,
                    arp.sender_ip,
                );
                let eth = EthernetFrame {
                    dst: arp.sender_mac,
                    src: self.config.switch_mac,
                    ethertype: ETHERTYPE_ARP,
                    payload: reply.encode().freeze(),
                };
                LbAction::PacketOut(packet_out_unicast(
                    self.config.switch_dpid,
                    eth.encode().freeze(),
                    in_port,
                ))
            }
            crate::packet::ArpOp::Reply => {
                if let Some(event) =
                    self.liveness
                        .handle_arp_reply(arp.sender_ip, arp.sender_mac, in_port)
                {
                    match event {
                        LivenessEvent::ServerUp(ip, server) => {
                            debug!(server = %ip, port = server.port, "liveness: server up");
                        }
                        LivenessEvent::ServerDown(ip) => {
                            debug!(server = %ip, "liveness: server down");
                        }
                    }
                }
                LbAction::None
            }
            crate::packet::ArpOp::Request => LbAction::None,
        }
    }

    // §4.5 step 3: reverse traffic from a known server back to a client.
    #[allow(clippy::too_many_arguments)]
    fn handle_from_server(
        &mut self,
        eth: &EthernetFrame,
        in_port: u16,
        server_ip: Ipv4Addr,
        client_ip: Ipv4Addr,
        server_port: u16,
        client_port: u16,
        raw: Bytes,
    ) -> LbAction {
        let key2 = Key2 {
            server_ip,
            client_ip,
            server_port,
            client_port,
        };
        let now = Instant::now();
        let Some((&key1, entry)) = self.memory.get_by_key2(&key2) else {
            warn!(?key2, "no client for key");
            return LbAction::PacketOut(packet_out_drop(self.config.switch_dpid));
        };
        let entry = entry.clone();
        self.memory.refresh(&key1, now + FLOW_MEMORY_TIMEOUT);

        let actions = vec![
            OfAction::SetDlSrc(self.config.switch_mac),
            OfAction::SetNwSrc(self.config.service_ip),
            OfAction::Output(OutputPort::Port(entry.client_port)),
        ];
        let r#match = OfMatch::from_packet(eth, in_port);
        LbAction::FlowMod(flow_mod_add(
            self.config.switch_dpid,
            r#match,
            actions,
            Some(raw),
        ))
    }

    // §4.5 step 4: forward traffic from a client to the service IP.
    #[allow(clippy::too_many_arguments)]
    fn handle_to_service(
        &mut self,
        eth: &EthernetFrame,
        in_port: u16,
        client_ip: Ipv4Addr,
        client_port: u16,
        service_port: u16,
        raw: Bytes,
        now: Instant,
    ) -> LbAction {
        let key1 = Key1 {
            client_ip,
            service_ip: self.config.service_ip,
            client_port,
            service_port,
        };

        let needs_new_server = match self.memory.get_by_key1(&key1) {
            Some(entry) => !self.liveness.is_live(&entry.server_ip),
            None => true,
        };

        if needs_new_server {
            let Some(server_ip) = self.pick_server() else {
                warn!("no live servers, dropping");
                return LbAction::PacketOut(packet_out_drop(self.config.switch_dpid));
            };
            let server = *self.liveness.live_servers().get(&server_ip).unwrap();
            let key2 = key1.reverse(server_ip);
            let entry = MemoryEntry {
                server_ip,
                server_mac: server.mac,
                client_port: in_port,
                client_mac: eth.src,
                expiration: now + FLOW_MEMORY_TIMEOUT,
                key2,
            };
            self.memory.insert(key1, key2, entry);
        } else {
            self.memory.refresh(&key1, now + FLOW_MEMORY_TIMEOUT);
        }

        let entry = self.memory.get_by_key1(&key1).unwrap();
        let server = entry.clone();
        let Some(live) = self.liveness.live_servers().get(&server.server_ip).copied() else {
            warn!(server = %server.server_ip, "selected server went down before flow-mod");
            return LbAction::PacketOut(packet_out_drop(self.config.switch_dpid));
        };

        let actions = vec![
            OfAction::SetDlDst(live.mac),
            OfAction::SetNwDst(server.server_ip),
            OfAction::Output(OutputPort::Port(live.port)),
        ];
        let r#match = OfMatch::from_packet(eth, in_port);
        LbAction::FlowMod(flow_mod_add(
            self.config.switch_dpid,
            r#match,
            actions,
            Some(raw),
        ))
    }

    // §4.5 step 4 / §9: round-robin cursor owned per-instance (a deliberate
    // deviation from a process-wide counter), selecting among live servers
    // in the order they most recently came up.
    fn pick_server(&mut self) -> Option<Ipv4Addr> {
        let live = self.liveness.live_order();
        if live.is_empty() {
            return None;
        }
        let selected = live[self.cursor % live.len()];
        self.cursor = self.cursor.wrapping_add(1);
        Some(selected)
    }

    pub fn expire(&mut self, now: Instant) {
        self.memory.expire(now);
    }

    // §4.4 step 5: returns the next server to probe only once this
    // instance's own deadline has passed, then reschedules it at its own
    // `probe_interval()`. Called once per global scheduler tick; instances
    // with a longer interval than the tick rate simply return `None` on
    // the ticks that aren't theirs yet.
    pub fn next_probe(&mut self, now: Instant) -> Option<Ipv4Addr> {
        if self.next_probe_at.is_some_and(|due| now < due) {
            return None;
        }
        let target = self.liveness.next_probe_target()?;
        self.liveness.mark_probed(target, now);
        self.next_probe_at = Some(now + self.liveness.probe_interval());
        Some(target)
    }
}

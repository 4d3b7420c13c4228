//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

// The controller task: the single owner of all per-switch state. Every
// mutation arrives here either as an `Inbound` message from a southbound
// connection, a reconciler reachability result, or a scheduler callback;
// nothing else ever touches `ConnectionRegistry` directly, which is what
// makes the single-threaded cooperative model in the specification an
// emergent property of message-passing rather than an actual
// single-threaded runtime.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sdnc_utils::mac::MacAddr;
use sdnc_utils::{Sender, UnboundedSender};

use crate::debug::Debug;
use crate::lb::{LbAction, LbConfig};
use crate::learning::LearningAction;
use crate::openflow::PacketOut;
use crate::packet::EthernetFrame;
use crate::reconciler::{self, HostTracker, LivenessOracle};
use crate::registry::ConnectionRegistry;
use crate::transport::{Inbound, Southbound};

pub struct ControllerParams {
    pub lb_bindings: Vec<LbConfig>,
    pub learning_enabled: bool,
    pub transparent: bool,
    pub hold_down: Duration,
    pub known_hosts: HashMap<Ipv4Addr, MacAddr>,
}

pub struct Controller {
    params: ControllerParams,
    registry: ConnectionRegistry,
    connections: HashMap<u64, UnboundedSender<Southbound>>,
    host_tracker: HostTracker,
}

impl Controller {
    pub fn new(params: ControllerParams) -> Self {
        let host_tracker = HostTracker::new(params.known_hosts.clone());
        Controller {
            params,
            registry: ConnectionRegistry::new(),
            connections: HashMap::new(),
            host_tracker,
        }
    }

    fn lb_config_for(&self, dpid: u64) -> Option<LbConfig> {
        self.params
            .lb_bindings
            .iter()
            .find(|cfg| cfg.switch_dpid == dpid)
            .cloned()
    }

    fn handle_connection_up(&mut self, dpid: u64, mac: MacAddr, now: Instant) {
        Debug::ConnectionUp(dpid).log();
        self.registry.connection_up(
            dpid,
            mac,
            self.lb_config_for(dpid),
            self.params.learning_enabled,
            self.params.transparent,
            self.params.hold_down,
            now,
        );
    }

    fn handle_connection_down(&mut self, dpid: u64) {
        Debug::ConnectionDown(dpid).log();
        self.registry.connection_down(dpid);
        self.connections.remove(&dpid);
    }

    fn handle_packet_in(&mut self, dpid: u64, port: u16, frame: bytes::Bytes, now: Instant) {
        let eth = match EthernetFrame::decode(frame.clone()) {
            Ok(eth) => eth,
            Err(error) => {
                crate::error::Error::from(error).log();
                return;
            }
        };
        Debug::PacketIn(dpid, port, &eth).log();

        let Some(state) = self.registry.get_mut(dpid) else {
            crate::error::Error::UnknownDpid(dpid).log();
            return;
        };

        let mut outbound = Vec::new();

        if let Some(lb) = state.lb.as_mut() {
            match lb.handle_packet_in(port, &eth, frame.clone(), now) {
                LbAction::FlowMod(fm) => outbound.push(Southbound::FlowMod(fm)),
                LbAction::PacketOut(po) => outbound.push(Southbound::PacketOut(po)),
                LbAction::None => {}
            }
        }

        if let Some(learning) = state.learning.as_mut() {
            match learning.handle_packet_in(port, &eth, frame, now) {
                LearningAction::FlowMod(fm) => outbound.push(Southbound::FlowMod(fm)),
                LearningAction::PacketOut(po) => outbound.push(Southbound::PacketOut(po)),
                LearningAction::None => {}
            }
        }

        for msg in outbound {
            self.send(dpid, msg);
        }
    }

    fn send(&self, dpid: u64, msg: Southbound) {
        if let Some(outbound) = self.connections.get(&dpid) {
            crate::transport::send(outbound, msg);
        }
    }

    // §4.4: one scheduler tick across every LB instance. Expired probes are
    // swept unconditionally; whether an instance actually gets a new ARP
    // request this tick is gated by its own `next_probe` deadline, so a
    // daemon running several differently-sized pools probes each at its own
    // cadence instead of all of them at the fastest one's.
    fn tick_probes(&mut self, now: Instant) {
        for state in self.registry.iter_mut() {
            let Some(lb) = state.lb.as_mut() else {
                continue;
            };
            lb.liveness.expire(now);
            lb.expire(now);
            let Some(target) = lb.next_probe(now) else {
                continue;
            };

            let arp = crate::packet::ArpPacket::request(state.switch_mac, lb.config.service_ip, target);
            let eth = EthernetFrame {
                dst: MacAddr::BROADCAST,
                src: state.switch_mac,
                ethertype: crate::packet::ETHERTYPE_ARP,
                payload: arp.encode().freeze(),
            };
            Debug::PacketOut(state.dpid, &eth).log();
            let po: PacketOut =
                crate::openflow::packet_out_flood(state.dpid, eth.encode().freeze());
            if let Some(outbound) = self.connections.get(&state.dpid) {
                crate::transport::send(outbound, Southbound::PacketOut(po));
            }
        }
    }

    // §4.7: one reconciler sweep given externally-resolved reachability.
    fn tick_reconciler(&mut self, reachability: &HashMap<Ipv4Addr, bool>) {
        let mut switches = HashMap::new();
        for dpid in self.registry.dpids() {
            switches.insert(dpid, self.registry.mac_to_port_snapshot(dpid));
        }
        let actions = reconciler::reconcile(&mut self.host_tracker, reachability, &switches);
        for action in actions {
            match action {
                reconciler::ReconcileAction::Insert { dpid, mac, port } => {
                    if let Some(state) = self.registry.get_mut(dpid)
                        && let Some(learning) = state.learning.as_mut()
                    {
                        learning.mac_to_port.insert(mac, port);
                    }
                }
                reconciler::ReconcileAction::Remove { dpid, mac, .. } => {
                    if let Some(state) = self.registry.get_mut(dpid)
                        && let Some(learning) = state.learning.as_mut()
                    {
                        learning.mac_to_port.remove(&mac);
                    }
                }
            }
        }
    }
}

// Spawns the reconciler's background reachability sweep (§4.10): runs off
// the controller task so a slow probe never stalls packet-in handling, and
// posts its boolean results back over `inbound` for the controller to
// apply under its own single-writer ownership of `macToPort`.
pub fn spawn_reconciler_worker(
    known_hosts: Vec<Ipv4Addr>,
    oracle: Arc<dyn LivenessOracle>,
    inbound: Sender<Inbound>,
) -> sdnc_utils::task::IntervalTask {
    sdnc_utils::task::every(crate::consts::RECONCILER_INTERVAL, move || {
        let known_hosts = known_hosts.clone();
        let oracle = oracle.clone();
        let inbound = inbound.clone();
        async move {
            let mut reachability = HashMap::new();
            for ip in known_hosts {
                reachability.insert(ip, oracle.is_reachable(ip).await);
            }
            let _ = inbound.send(Inbound::Reachability(reachability)).await;
        }
    })
}

// Drives the controller off the southbound `Inbound` channel and the
// scheduler-driven probe sweep, all dispatched from this one task.
pub async fn run(params: ControllerParams, mut inbound: sdnc_utils::Receiver<Inbound>) {
    let mut controller = Controller::new(params);
    let mut probe_interval = crate::consts::PROBE_CYCLE_TIME;

    loop {
        let sleep = tokio::time::sleep(probe_interval);
        tokio::select! {
            biased;

            msg = inbound.recv() => {
                let Some(msg) = msg else { break };
                match msg {
                    Inbound::ConnectionUp { dpid, mac, outbound } => {
                        controller.connections.insert(dpid, outbound);
                        controller.handle_connection_up(dpid, mac, Instant::now());
                    }
                    Inbound::ConnectionDown { dpid } => {
                        controller.handle_connection_down(dpid);
                    }
                    Inbound::PacketIn { dpid, port, frame } => {
                        controller.handle_packet_in(dpid, port, frame, Instant::now());
                    }
                    Inbound::Reachability(reachability) => {
                        controller.tick_reconciler(&reachability);
                    }
                }
            }

            _ = sleep => {
                controller.tick_probes(Instant::now());
                probe_interval = controller
                    .registry
                    .iter_mut()
                    .filter_map(|s| s.lb.as_ref().map(|lb| lb.liveness.probe_interval()))
                    .min()
                    .unwrap_or(crate::consts::PROBE_CYCLE_TIME);
            }
        }
    }
}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

// Multi-packet scenarios driving the LB and learning-switch state machines
// directly (no sockets), asserting on the emitted OfAction/FlowMod values.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use sdnc_core::consts::ARP_TIMEOUT;
use sdnc_core::lb::{LbAction, LbConfig, LbInstance};
use sdnc_core::learning::{LearningAction, LearningSwitch};
use sdnc_core::openflow::{OfAction, OutputPort};
use sdnc_core::packet::{EthernetFrame, ETHERTYPE_IPV4, IPPROTO_TCP};
use sdnc_utils::mac::MacAddr;

fn tcp_frame(src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16) -> EthernetFrame {
    let mut ip = BytesMut::zeroed(20);
    ip[0] = 0x45;
    ip[9] = IPPROTO_TCP;
    ip[12..16].copy_from_slice(&src.octets());
    ip[16..20].copy_from_slice(&dst.octets());
    ip.put_u16(src_port);
    ip.put_u16(dst_port);
    EthernetFrame {
        dst: MacAddr::from([0, 0, 0, 0, 0, 0xaa]),
        src: MacAddr::from([0, 0, 0, 0, 0, 1]),
        ethertype: ETHERTYPE_IPV4,
        payload: ip.freeze(),
    }
}

fn two_server_lb() -> LbInstance {
    let mut lb = LbInstance::new(LbConfig {
        service_ip: Ipv4Addr::new(10, 0, 1, 1),
        servers: vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)],
        switch_dpid: 1,
        switch_mac: MacAddr::from([0, 0, 0, 0, 0, 0xaa]),
    });
    // Both servers declared up via ARP replies, in order, on their
    // respective switch ports.
    lb.liveness.handle_arp_reply(
        Ipv4Addr::new(10, 0, 0, 1),
        MacAddr::from([0, 0, 0, 0, 0, 1]),
        1,
    );
    lb.liveness.handle_arp_reply(
        Ipv4Addr::new(10, 0, 0, 2),
        MacAddr::from([0, 0, 0, 0, 0, 2]),
        2,
    );
    lb
}

// S1 — first client flow selects round robin; S2 — a second, distinct flow
// picks the next server; S3 — the first client recurring within the memory
// timeout gets the same server back with no new memory entry allocated.
#[test]
fn s1_s2_s3_round_robin_then_memory_reuse() {
    let mut lb = two_server_lb();

    // S1
    let client_a = tcp_frame(
        Ipv4Addr::new(10, 0, 2, 5),
        Ipv4Addr::new(10, 0, 1, 1),
        40000,
        80,
    );
    let action = lb.handle_packet_in(3, &client_a, client_a.payload.clone(), Instant::now());
    let fm = match action {
        LbAction::FlowMod(fm) => fm,
        _ => panic!("expected forward flow-mod"),
    };
    assert_eq!(fm.actions[0], OfAction::SetDlDst(MacAddr::from([0, 0, 0, 0, 0, 1])));
    assert_eq!(fm.actions[1], OfAction::SetNwDst(Ipv4Addr::new(10, 0, 0, 1)));
    assert_eq!(fm.actions[2], OfAction::Output(OutputPort::Port(1)));
    assert_eq!(lb.memory.len(), 1);

    // S2
    let client_b = tcp_frame(
        Ipv4Addr::new(10, 0, 2, 6),
        Ipv4Addr::new(10, 0, 1, 1),
        40000,
        80,
    );
    let action = lb.handle_packet_in(3, &client_b, client_b.payload.clone(), Instant::now());
    let fm = match action {
        LbAction::FlowMod(fm) => fm,
        _ => panic!("expected forward flow-mod"),
    };
    assert_eq!(fm.actions[0], OfAction::SetDlDst(MacAddr::from([0, 0, 0, 0, 0, 2])));
    assert_eq!(fm.actions[1], OfAction::SetNwDst(Ipv4Addr::new(10, 0, 0, 2)));
    assert_eq!(lb.memory.len(), 2);

    // S3 — same tuple as S1, within the memory timeout.
    let action = lb.handle_packet_in(3, &client_a, client_a.payload.clone(), Instant::now());
    let fm = match action {
        LbAction::FlowMod(fm) => fm,
        _ => panic!("expected forward flow-mod"),
    };
    assert_eq!(fm.actions[0], OfAction::SetDlDst(MacAddr::from([0, 0, 0, 0, 0, 1])));
    assert_eq!(lb.memory.len(), 2, "no new entry allocated for a returning client");
}

// S4 — server death during an active flow steers a new flow for the same
// client key to the remaining live server.
#[test]
fn s4_server_death_reassigns_flow() {
    let mut lb = two_server_lb();
    let now = Instant::now();

    let client_a = tcp_frame(
        Ipv4Addr::new(10, 0, 2, 5),
        Ipv4Addr::new(10, 0, 1, 1),
        40000,
        80,
    );
    let action = lb.handle_packet_in(3, &client_a, client_a.payload.clone(), now);
    assert!(matches!(
        action,
        LbAction::FlowMod(ref fm) if fm.actions[0] == OfAction::SetDlDst(MacAddr::from([0, 0, 0, 0, 0, 1]))
    ));

    // 10.0.0.1 stops replying to ARP: arm an outstanding probe and let its
    // deadline pass without a reply.
    lb.liveness.mark_probed(Ipv4Addr::new(10, 0, 0, 1), now);
    let events = lb.liveness.expire(now + ARP_TIMEOUT + Duration::from_millis(1));
    assert!(!events.is_empty(), "expected a server-down event");
    assert!(!lb.liveness.is_live(&Ipv4Addr::new(10, 0, 0, 1)));

    // A new flow for the same client key now steers to 10.0.0.2.
    let action = lb.handle_packet_in(3, &client_a, client_a.payload.clone(), now);
    match action {
        LbAction::FlowMod(fm) => {
            assert_eq!(fm.actions[0], OfAction::SetDlDst(MacAddr::from([0, 0, 0, 0, 0, 2])));
            assert_eq!(fm.actions[1], OfAction::SetNwDst(Ipv4Addr::new(10, 0, 0, 2)));
        }
        _ => panic!("expected the client to be steered to the surviving server"),
    }
}

// S5 — return traffic from a server is rewritten with the switch's own MAC
// and the service IP, and output to the client's originally recorded
// ingress port.
#[test]
fn s5_return_traffic_rewrite() {
    let mut lb = two_server_lb();
    let now = Instant::now();

    let forward = tcp_frame(
        Ipv4Addr::new(10, 0, 2, 5),
        Ipv4Addr::new(10, 0, 1, 1),
        40000,
        80,
    );
    lb.handle_packet_in(3, &forward, forward.payload.clone(), now);

    // Reply from 10.0.0.1:80 back to the client, arriving on that server's
    // switch port (1, per `two_server_lb`'s ARP reply).
    let reverse = tcp_frame(
        Ipv4Addr::new(10, 0, 0, 1),
        Ipv4Addr::new(10, 0, 2, 5),
        80,
        40000,
    );
    let action = lb.handle_packet_in(1, &reverse, reverse.payload.clone(), now);
    match action {
        LbAction::FlowMod(fm) => {
            assert_eq!(fm.actions[0], OfAction::SetDlSrc(MacAddr::from([0, 0, 0, 0, 0, 0xaa])));
            assert_eq!(fm.actions[1], OfAction::SetNwSrc(Ipv4Addr::new(10, 0, 1, 1)));
            assert_eq!(fm.actions[2], OfAction::Output(OutputPort::Port(3)));
        }
        _ => panic!("expected reverse flow-mod"),
    }
}

// S6 — a learning switch that already knows B is on port 2 sees a frame
// from A to B arrive on port 2 itself: a same-port echo, dropped with a
// short-lived drop flow rather than forwarded.
#[test]
fn s6_learning_switch_loop_avoidance() {
    let now = Instant::now();
    let mut sw = LearningSwitch::new(1, false, Duration::ZERO, now);
    let mac_b = MacAddr::from([0, 0, 0, 0, 0, 2]);
    sw.mac_to_port.insert(mac_b, 2);

    let frame = EthernetFrame {
        dst: mac_b,
        src: MacAddr::from([0, 0, 0, 0, 0, 1]),
        ethertype: ETHERTYPE_IPV4,
        payload: bytes::Bytes::from_static(&[1, 2, 3]),
    };
    let action = sw.handle_packet_in(2, &frame, frame.payload.clone(), now);
    match action {
        LearningAction::FlowMod(fm) => {
            assert!(fm.actions.is_empty(), "drop flow carries no output action");
            assert_eq!(fm.hard_timeout, 0);
            assert_eq!(fm.idle_timeout, sdnc_core::consts::LEARNING_SAME_PORT_DROP_TIMEOUT);
        }
        _ => panic!("expected a short drop flow-mod, not a forwarding decision"),
    }
}

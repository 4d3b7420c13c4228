//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

// Builders for the three kinds of outbound OpenFlow-ish messages the
// controller core ever emits. These are not a full OpenFlow 1.0 encoder;
// they construct the serializable [`OfMessage`] values that the southbound
// transport (see `transport.rs`) puts on the wire, and the `ofp_match`-like
// fields the reference protocol derives from a packet-in.

use std::net::Ipv4Addr;

use bytes::Bytes;
use sdnc_utils::mac::MacAddr;
use serde::{Deserialize, Serialize};

use crate::consts::{FLOW_HARD_TIMEOUT_PERMANENT, FLOW_IDLE_TIMEOUT};

// Match fields derived from a packet-in plus its ingress port. `None` means
// "wildcard this field" when the message is re-serialized for the switch.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct OfMatch {
    pub in_port: Option<u16>,
    pub dl_src: Option<MacAddr>,
    pub dl_dst: Option<MacAddr>,
    pub dl_type: Option<u16>,
    pub nw_src: Option<Ipv4Addr>,
    pub nw_dst: Option<Ipv4Addr>,
    pub nw_proto: Option<u8>,
    pub tp_src: Option<u16>,
    pub tp_dst: Option<u16>,
}

impl OfMatch {
    // Builds the match a flow-mod installs for the frame that triggered it:
    // every field the switch can match on, narrowed to this exact flow.
    pub fn from_packet(eth: &crate::packet::EthernetFrame, in_port: u16) -> Self {
        let mut m = OfMatch {
            in_port: Some(in_port),
            dl_src: Some(eth.src),
            dl_dst: Some(eth.dst),
            dl_type: Some(eth.ethertype),
            ..Default::default()
        };
        if let crate::packet::ParsedFrame::Tcp { ip, tcp } =
            crate::packet::classify(eth)
        {
            m.nw_src = Some(ip.src);
            m.nw_dst = Some(ip.dst);
            m.nw_proto = Some(ip.protocol);
            m.tp_src = Some(tcp.src_port);
            m.tp_dst = Some(tcp.dst_port);
        }
        m
    }
}

// Actions are applied in list order; OpenFlow 1.0 executes a flow's action
// list sequentially, so address rewrites must precede the output action.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OfAction {
    SetDlSrc(MacAddr),
    SetDlDst(MacAddr),
    SetNwSrc(Ipv4Addr),
    SetNwDst(Ipv4Addr),
    Output(OutputPort),
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OutputPort {
    Port(u16),
    Flood,
}

// The southbound message vocabulary. `FlowMod`, `PacketOut` and `Hello`/`Bye`
// are the controller-to-switch direction; `PacketIn` is switch-to-controller
// (defined in `transport.rs` alongside the rest of the wire enum).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FlowMod {
    pub dpid: u64,
    pub cookie: u64,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub r#match: OfMatch,
    pub actions: Vec<OfAction>,
    // The buffered packet the switch should re-emit through the new flow,
    // rather than the controller re-sending it as a separate packet-out.
    pub buffer_data: Option<Bytes>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PacketOut {
    pub dpid: u64,
    pub actions: Vec<OfAction>,
    pub data: Option<Bytes>,
}

static NEXT_COOKIE: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

fn next_cookie() -> u64 {
    NEXT_COOKIE.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
}

// Broadcasts `frame` out every port but the one it arrived on (or all ports,
// for controller-originated frames like ARP probes with no ingress port).
pub fn packet_out_flood(dpid: u64, frame: Bytes) -> PacketOut {
    PacketOut {
        dpid,
        actions: vec![OfAction::Output(OutputPort::Flood)],
        data: Some(frame),
    }
}

// Releases a buffered packet with no forwarding action, freeing the
// switch-side buffer slot without emitting the frame anywhere.
pub fn packet_out_drop(dpid: u64) -> PacketOut {
    PacketOut {
        dpid,
        actions: Vec::new(),
        data: None,
    }
}

// Sends a controller-built frame out a single port, used by the LB's
// inline ARP responder to answer a service-IP ARP request on its own
// ingress port.
pub fn packet_out_unicast(dpid: u64, frame: Bytes, port: u16) -> PacketOut {
    PacketOut {
        dpid,
        actions: vec![OfAction::Output(OutputPort::Port(port))],
        data: Some(frame),
    }
}

// A permanent flow-mod, matching this codebase's convention of exposing a
// named constant rather than a magic `0` for "no hard timeout".
pub fn flow_mod_add(
    dpid: u64,
    r#match: OfMatch,
    actions: Vec<OfAction>,
    buffer_data: Option<Bytes>,
) -> FlowMod {
    FlowMod {
        dpid,
        cookie: next_cookie(),
        idle_timeout: FLOW_IDLE_TIMEOUT.as_secs() as u16,
        hard_timeout: FLOW_HARD_TIMEOUT_PERMANENT,
        r#match,
        actions,
        buffer_data,
    }
}

pub fn flow_mod_add_with_timeouts(
    dpid: u64,
    r#match: OfMatch,
    actions: Vec<OfAction>,
    buffer_data: Option<Bytes>,
    idle_timeout: u16,
    hard_timeout: u16,
) -> FlowMod {
    FlowMod {
        dpid,
        cookie: next_cookie(),
        idle_timeout,
        hard_timeout,
        r#match,
        actions,
        buffer_data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{EthernetFrame, ETHERTYPE_IPV4};

    #[test]
    fn match_from_tcp_packet_captures_five_tuple() {
        let mut ip = bytes::BytesMut::zeroed(20);
        ip[0] = 0x45;
        ip[9] = crate::packet::IPPROTO_TCP;
        ip[12..16].copy_from_slice(&Ipv4Addr::new(10, 0, 0, 5).octets());
        ip[16..20].copy_from_slice(&Ipv4Addr::new(10, 0, 0, 1).octets());
        use bytes::BufMut;
        ip.put_u16(1234);
        ip.put_u16(80);

        let eth = EthernetFrame {
            dst: MacAddr::ZERO,
            src: MacAddr::ZERO,
            ethertype: ETHERTYPE_IPV4,
            payload: ip.freeze(),
        };
        let m = OfMatch::from_packet(&eth, 3);
        assert_eq!(m.in_port, Some(3));
        assert_eq!(m.nw_src, Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(m.tp_dst, Some(80));
    }

    #[test]
    fn flood_packet_out_carries_no_restricted_port() {
        let po = packet_out_flood(1, Bytes::from_static(&[0xff]));
        assert_eq!(po.actions, vec![OfAction::Output(OutputPort::Flood)]);
    }
}

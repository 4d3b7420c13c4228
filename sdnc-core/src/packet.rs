//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

// Byte-level codecs for the handful of frame kinds the controller core
// operates on. There is no general-purpose packet library here: only enough
// of Ethernet, ARP, IPv4 and TCP to classify a frame, extract the fields the
// load balancer and learning switch need, and rewrite addresses in place.

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use internet_checksum::Checksum;
use sdnc_utils::mac::MacAddr;
use serde::{Deserialize, Serialize};

pub type DecodeResult<T> = Result<T, DecodeError>;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DecodeError {
    InsufficientData,
    UnsupportedHwType,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::InsufficientData => {
                write!(f, "frame shorter than its declared header")
            }
            DecodeError::UnsupportedHwType => {
                write!(f, "unsupported ARP hardware/protocol type")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_LLDP: u16 = 0x88cc;

pub const IPPROTO_TCP: u8 = 6;

// ===== Ethernet =====

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EthernetFrame {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ethertype: u16,
    pub payload: Bytes,
}

impl EthernetFrame {
    const HEADER_LEN: usize = 14;

    pub fn decode(mut buf: Bytes) -> DecodeResult<Self> {
        if buf.len() < Self::HEADER_LEN {
            return Err(DecodeError::InsufficientData);
        }
        let dst = read_mac(&mut buf);
        let src = read_mac(&mut buf);
        let ethertype = buf.get_u16();
        Ok(EthernetFrame {
            dst,
            src,
            ethertype,
            payload: buf,
        })
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::HEADER_LEN + self.payload.len());
        buf.put_slice(&self.dst.as_bytes());
        buf.put_slice(&self.src.as_bytes());
        buf.put_u16(self.ethertype);
        buf.put_slice(&self.payload);
        buf
    }
}

fn read_mac(buf: &mut Bytes) -> MacAddr {
    let mut bytes = [0u8; 6];
    buf.copy_to_slice(&mut bytes);
    MacAddr::from(bytes)
}

// ===== ARP =====

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArpOp {
    Request,
    Reply,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArpPacket {
    pub operation: ArpOp,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    const LENGTH: usize = 28;
    const HW_TYPE_ETHERNET: u16 = 1;
    const PROTO_TYPE_IPV4: u16 = ETHERTYPE_IPV4;

    pub fn decode(mut buf: Bytes) -> DecodeResult<Self> {
        if buf.len() < Self::LENGTH {
            return Err(DecodeError::InsufficientData);
        }
        let hw_type = buf.get_u16();
        let proto_type = buf.get_u16();
        let hw_len = buf.get_u8();
        let proto_len = buf.get_u8();
        if hw_type != Self::HW_TYPE_ETHERNET
            || proto_type != Self::PROTO_TYPE_IPV4
            || hw_len != 6
            || proto_len != 4
        {
            return Err(DecodeError::UnsupportedHwType);
        }
        let opcode = buf.get_u16();
        let operation = match opcode {
            1 => ArpOp::Request,
            2 => ArpOp::Reply,
            _ => return Err(DecodeError::UnsupportedHwType),
        };
        let sender_mac = read_mac(&mut buf);
        let sender_ip = read_ipv4(&mut buf);
        let target_mac = read_mac(&mut buf);
        let target_ip = read_ipv4(&mut buf);
        Ok(ArpPacket {
            operation,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        })
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::LENGTH);
        buf.put_u16(Self::HW_TYPE_ETHERNET);
        buf.put_u16(Self::PROTO_TYPE_IPV4);
        buf.put_u8(6);
        buf.put_u8(4);
        buf.put_u16(match self.operation {
            ArpOp::Request => 1,
            ArpOp::Reply => 2,
        });
        buf.put_slice(&self.sender_mac.as_bytes());
        buf.put_slice(&self.sender_ip.octets());
        buf.put_slice(&self.target_mac.as_bytes());
        buf.put_slice(&self.target_ip.octets());
        buf
    }

    // Builds the ARP request the liveness engine floods to probe a server.
    pub fn request(
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_ip: Ipv4Addr,
    ) -> Self {
        ArpPacket {
            operation: ArpOp::Request,
            sender_mac,
            sender_ip,
            target_mac: MacAddr::ZERO,
            target_ip,
        }
    }

    // Builds the ARP reply the LB's ARP-responder sends for a service IP.
    pub fn reply(
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        ArpPacket {
            operation: ArpOp::Reply,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        }
    }
}

fn read_ipv4(buf: &mut Bytes) -> Ipv4Addr {
    Ipv4Addr::new(buf.get_u8(), buf.get_u8(), buf.get_u8(), buf.get_u8())
}

// ===== IPv4 =====

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ipv4Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub ttl: u8,
    // Header length in bytes (IHL * 4), needed to find the payload offset;
    // options are preserved verbatim but never interpreted.
    ihl: usize,
}

impl Ipv4Header {
    const MIN_LENGTH: usize = 20;

    pub fn decode(buf: &Bytes) -> DecodeResult<(Self, Bytes)> {
        if buf.len() < Self::MIN_LENGTH {
            return Err(DecodeError::InsufficientData);
        }
        let version_ihl = buf[0];
        let ihl = ((version_ihl & 0x0f) as usize) * 4;
        if buf.len() < ihl {
            return Err(DecodeError::InsufficientData);
        }
        let ttl = buf[8];
        let protocol = buf[9];
        let src = Ipv4Addr::new(buf[12], buf[13], buf[14], buf[15]);
        let dst = Ipv4Addr::new(buf[16], buf[17], buf[18], buf[19]);
        let payload = buf.slice(ihl..);
        Ok((
            Ipv4Header {
                src,
                dst,
                protocol,
                ttl,
                ihl,
            },
            payload,
        ))
    }

    // Rewrites the source and/or destination address in place and
    // recomputes the header checksum, matching the set-nw-src/set-nw-dst
    // OpenFlow actions the load balancer installs for forward and reverse
    // rewriting.
    pub fn rewrite(
        buf: &mut BytesMut,
        new_src: Option<Ipv4Addr>,
        new_dst: Option<Ipv4Addr>,
    ) {
        if let Some(src) = new_src {
            buf[12..16].copy_from_slice(&src.octets());
        }
        if let Some(dst) = new_dst {
            buf[16..20].copy_from_slice(&dst.octets());
        }
        let ihl = ((buf[0] & 0x0f) as usize) * 4;
        buf[10..12].copy_from_slice(&[0, 0]);
        let mut cksum = Checksum::new();
        cksum.add_bytes(&buf[..ihl]);
        buf[10..12].copy_from_slice(&cksum.checksum());
    }

    pub fn header_len(&self) -> usize {
        self.ihl
    }
}

// ===== TCP =====

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
}

impl TcpHeader {
    const MIN_LENGTH: usize = 4;

    pub fn decode(buf: &Bytes) -> DecodeResult<Self> {
        if buf.len() < Self::MIN_LENGTH {
            return Err(DecodeError::InsufficientData);
        }
        let src_port = u16::from_be_bytes([buf[0], buf[1]]);
        let dst_port = u16::from_be_bytes([buf[2], buf[3]]);
        Ok(TcpHeader { src_port, dst_port })
    }
}

// ===== classified view =====

// The result of walking an Ethernet frame down to the layer the controller
// cares about, mirroring the find-the-inner-header traversal a packet-in
// handler needs before it can decide anything.
#[derive(Clone, Debug)]
pub enum ParsedFrame {
    Arp(ArpPacket),
    Tcp { ip: Ipv4Header, tcp: TcpHeader },
    Other,
}

pub fn classify(eth: &EthernetFrame) -> ParsedFrame {
    match eth.ethertype {
        ETHERTYPE_ARP => match ArpPacket::decode(eth.payload.clone()) {
            Ok(arp) => ParsedFrame::Arp(arp),
            Err(_) => ParsedFrame::Other,
        },
        ETHERTYPE_IPV4 => match Ipv4Header::decode(&eth.payload) {
            Ok((ip, payload)) if ip.protocol == IPPROTO_TCP => {
                match TcpHeader::decode(&payload) {
                    Ok(tcp) => ParsedFrame::Tcp { ip, tcp },
                    Err(_) => ParsedFrame::Other,
                }
            }
            _ => ParsedFrame::Other,
        },
        _ => ParsedFrame::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddr {
        MacAddr::from([0x00, 0x00, 0x00, 0x00, 0x00, last])
    }

    #[test]
    fn ethernet_round_trips() {
        let frame = EthernetFrame {
            dst: MacAddr::BROADCAST,
            src: mac(1),
            ethertype: ETHERTYPE_ARP,
            payload: Bytes::from_static(&[1, 2, 3]),
        };
        let encoded = frame.encode().freeze();
        let decoded = EthernetFrame::decode(encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn arp_round_trips_and_classifies() {
        let arp = ArpPacket::request(
            mac(1),
            Ipv4Addr::new(10, 0, 1, 1),
            Ipv4Addr::new(10, 0, 0, 1),
        );
        let eth = EthernetFrame {
            dst: MacAddr::BROADCAST,
            src: mac(1),
            ethertype: ETHERTYPE_ARP,
            payload: arp.encode().freeze(),
        };
        match classify(&eth) {
            ParsedFrame::Arp(decoded) => assert_eq!(decoded, arp),
            other => panic!("expected ARP, got {other:?}"),
        }
    }

    #[test]
    fn ipv4_rewrite_updates_checksum() {
        let mut header = BytesMut::zeroed(20);
        header[0] = 0x45; // version 4, IHL 5
        header[9] = IPPROTO_TCP;
        header[12..16].copy_from_slice(&Ipv4Addr::new(10, 0, 0, 1).octets());
        header[16..20].copy_from_slice(&Ipv4Addr::new(10, 0, 2, 5).octets());

        Ipv4Header::rewrite(&mut header, Some(Ipv4Addr::new(10, 0, 1, 1)), None);

        let frozen = header.clone().freeze();
        let (decoded, _) = Ipv4Header::decode(&frozen).unwrap();
        assert_eq!(decoded.src, Ipv4Addr::new(10, 0, 1, 1));
        assert_eq!(decoded.dst, Ipv4Addr::new(10, 0, 2, 5));

        let mut cksum = Checksum::new();
        cksum.add_bytes(&header[..20]);
        assert_eq!(cksum.checksum(), [0, 0]);
    }

    #[test]
    fn tcp_classification_requires_both_layers() {
        let mut header = BytesMut::zeroed(20);
        header[0] = 0x45;
        header[9] = IPPROTO_TCP;
        header[12..16].copy_from_slice(&Ipv4Addr::new(10, 0, 2, 5).octets());
        header[16..20].copy_from_slice(&Ipv4Addr::new(10, 0, 1, 1).octets());
        header.put_u16(40000);
        header.put_u16(80);

        let eth = EthernetFrame {
            dst: mac(1),
            src: mac(2),
            ethertype: ETHERTYPE_IPV4,
            payload: header.freeze(),
        };
        match classify(&eth) {
            ParsedFrame::Tcp { ip, tcp } => {
                assert_eq!(ip.src, Ipv4Addr::new(10, 0, 2, 5));
                assert_eq!(tcp.src_port, 40000);
                assert_eq!(tcp.dst_port, 80);
            }
            other => panic!("expected TCP, got {other:?}"),
        }
    }
}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::{debug, debug_span};

use crate::packet::EthernetFrame;

// Controller debug messages, carrying the PacketTrace fields (dpid,
// ingress port, ethertype) needed to correlate a logged decision with the
// frame that caused it.
#[derive(Debug)]
pub enum Debug<'a> {
    ConnectionUp(u64),
    ConnectionDown(u64),
    // Network
    PacketIn(u64, u16, &'a EthernetFrame),
    PacketOut(u64, &'a EthernetFrame),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::ConnectionUp(dpid) | Debug::ConnectionDown(dpid) => {
                debug!(dpid, "{}", self);
            }
            Debug::PacketIn(dpid, port, frame) => {
                debug_span!("network").in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        debug!(
                            dpid,
                            port,
                            ethertype = format_args!("{:#06x}", frame.ethertype),
                            "{}",
                            self
                        );
                    })
                })
            }
            Debug::PacketOut(dpid, frame) => {
                debug_span!("network").in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        debug!(
                            dpid,
                            ethertype = format_args!("{:#06x}", frame.ethertype),
                            "{}",
                            self
                        );
                    })
                })
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::ConnectionUp(..) => write!(f, "switch connected"),
            Debug::ConnectionDown(..) => write!(f, "switch disconnected"),
            Debug::PacketIn(..) => write!(f, "packet-in"),
            Debug::PacketOut(..) => write!(f, "packet-out"),
        }
    }
}

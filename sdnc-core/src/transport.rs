//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

// A concrete southbound transport: one TCP connection per simulated switch,
// carrying line-delimited JSON records. This stands in for the real
// OpenFlow 1.0 binary wire protocol, which this project keeps out of scope
// (there are no physical switches to interoperate with); the message
// vocabulary mirrors the ofp_packet_out/ofp_flow_mod shape closely enough
// that swapping in a real codec later only touches this module.

use std::net::SocketAddr;

use bytes::Bytes;
use sdnc_utils::mac::MacAddr;
use sdnc_utils::task::Task;
use sdnc_utils::{Sender, UnboundedReceiver, UnboundedSender};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug_span, error, warn, Instrument};

use crate::error::IoError;
use crate::openflow::{FlowMod, PacketOut};

// Controller-to-switch direction.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum Southbound {
    PacketOut(PacketOut),
    FlowMod(FlowMod),
    Bye,
}

// Switch-to-controller direction.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum Northbound {
    Hello { dpid: u64, mac: MacAddr },
    PacketIn { port: u16, frame: Bytes },
    Bye,
}

// Message posted to the controller task: either a southbound connection
// event/frame, tagged with the dpid once a `Hello` has been exchanged, or
// the result of a reconciler reachability sweep (see `reconciler.rs`/§4.10)
// posted back from its background worker.
#[derive(Debug)]
pub enum Inbound {
    ConnectionUp {
        dpid: u64,
        mac: MacAddr,
        outbound: UnboundedSender<Southbound>,
    },
    ConnectionDown {
        dpid: u64,
    },
    PacketIn {
        dpid: u64,
        port: u16,
        frame: Bytes,
    },
    Reachability(std::collections::HashMap<std::net::Ipv4Addr, bool>),
}

// Accepts switch connections and bridges each one's socket I/O to the
// controller task via `inbound`, mirroring this codebase's net_rx/net_tx
// task-pair convention for per-connection socket plumbing.
pub async fn listen(
    addr: SocketAddr,
    inbound: Sender<Inbound>,
) -> Result<Task<()>, IoError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(IoError::ConnectError)?;
    Ok(Task::spawn(
        async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        accept_connection(stream, peer, inbound.clone());
                    }
                    Err(error) => {
                        IoError::ConnectError(error).log();
                    }
                }
            }
        }
        .instrument(debug_span!("southbound", %addr)),
    ))
}

fn accept_connection(stream: TcpStream, peer: SocketAddr, inbound: Sender<Inbound>) {
    Task::spawn(
        async move {
            if let Err(error) = handle_connection(stream, inbound).await {
                error.log();
            }
        }
        .instrument(debug_span!("connection", %peer)),
    )
    .detach();
}

async fn handle_connection(
    stream: TcpStream,
    inbound: Sender<Inbound>,
) -> Result<(), IoError> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half).lines();

    let first_line = reader
        .next_line()
        .await
        .map_err(IoError::RecvError)?
        .ok_or_else(|| {
            IoError::RecvError(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before Hello",
            ))
        })?;
    let Northbound::Hello { dpid, mac } =
        serde_json::from_str(&first_line).map_err(IoError::MalformedMessage)?
    else {
        warn!("first message on a southbound connection must be Hello");
        return Ok(());
    };

    let (outbound_tx, outbound_rx) = tokio::sync::mpsc::unbounded_channel();
    let _tx_task = spawn_tx(write_half, outbound_rx);

    if inbound
        .send(Inbound::ConnectionUp {
            dpid,
            mac,
            outbound: outbound_tx,
        })
        .await
        .is_err()
    {
        return Ok(());
    }

    loop {
        let line = reader.next_line().await.map_err(IoError::RecvError)?;
        let Some(line) = line else {
            break;
        };
        let msg: Northbound =
            serde_json::from_str(&line).map_err(IoError::MalformedMessage)?;
        match msg {
            Northbound::Hello { .. } => {
                warn!(dpid, "unexpected duplicate Hello, ignoring");
            }
            Northbound::PacketIn { port, frame } => {
                if inbound
                    .send(Inbound::PacketIn { dpid, port, frame })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Northbound::Bye => break,
        }
    }

    let _ = inbound.send(Inbound::ConnectionDown { dpid }).await;
    Ok(())
}

fn spawn_tx(
    write_half: tokio::net::tcp::OwnedWriteHalf,
    mut outbound_rx: UnboundedReceiver<Southbound>,
) -> Task<()> {
    Task::spawn(
        async move {
            let mut write_half = write_half;
            while let Some(msg) = outbound_rx.recv().await {
                let Ok(mut line) = serde_json::to_string(&msg) else {
                    continue;
                };
                line.push('\n');
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        }
        .instrument(debug_span!("network")),
    )
}

// Sends `msg` to the switch identified by `outbound`, logging (not
// panicking) if the connection has already gone away.
pub fn send(outbound: &UnboundedSender<Southbound>, msg: Southbound) {
    if outbound.send(msg).is_err() {
        error!("attempted to send to a closed southbound connection");
    }
}

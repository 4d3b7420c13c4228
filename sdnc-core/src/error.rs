//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use tracing::{warn, warn_span};

// Controller-core errors.
#[derive(Debug)]
pub enum Error {
    // I/O errors
    IoError(IoError),

    // other errors
    UnknownDpid(u64),
    UnconfiguredServiceIp(Ipv4Addr),
    DecodeError(crate::packet::DecodeError),
}

// Southbound transport I/O errors.
#[derive(Debug)]
pub enum IoError {
    ConnectError(std::io::Error),
    RecvError(std::io::Error),
    SendError(std::io::Error),
    MalformedMessage(serde_json::Error),
}

// ===== impl Error =====

impl Error {
    pub fn log(&self) {
        match self {
            Error::IoError(error) => {
                error.log();
            }
            Error::UnknownDpid(_) => {
                warn_span!("controller").in_scope(|| {
                    warn!("{}", self);
                });
            }
            Error::UnconfiguredServiceIp(_) => {
                warn_span!("controller").in_scope(|| {
                    warn!("{}", self);
                });
            }
            Error::DecodeError(_) => {
                warn_span!("controller").in_scope(|| {
                    warn!("{}", self);
                });
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::UnknownDpid(dpid) => {
                write!(f, "packet-in from unregistered dpid {dpid}")
            }
            Error::UnconfiguredServiceIp(ip) => {
                write!(f, "no LB instance configured for service IP {ip}")
            }
            Error::DecodeError(error) => write!(f, "malformed frame: {error}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

impl From<crate::packet::DecodeError> for Error {
    fn from(error: crate::packet::DecodeError) -> Error {
        Error::DecodeError(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub fn log(&self) {
        match self {
            IoError::ConnectError(error) | IoError::RecvError(error) | IoError::SendError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            IoError::MalformedMessage(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::ConnectError(..) => write!(f, "failed to accept switch connection"),
            IoError::RecvError(..) => write!(f, "error reading from switch connection"),
            IoError::SendError(..) => write!(f, "error writing to switch connection"),
            IoError::MalformedMessage(..) => write!(f, "malformed southbound message"),
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::ConnectError(error) | IoError::RecvError(error) | IoError::SendError(error) => {
                Some(error)
            }
            IoError::MalformedMessage(error) => Some(error),
        }
    }
}

// ===== global functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}

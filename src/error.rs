use std::{io, time::Duration};
use thiserror::Error as ThisError;

pub type OpaqueError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("could not resolve hostname: {host}")]
    Resolution { host: String },
    #[error("hostname {host} has no IPv4 address")]
    NoIpv4Address { host: String },
    #[error("failed to create raw socket, reason: {0}")]
    SocketCreation(#[source] io::Error),
    #[error("error sending/receiving data, reason: {0}")]
    TransientIo(#[source] io::Error),
    #[error("I/O error, reason: {0}")]
    Io(#[from] io::Error),
    #[error("watchdog timeout ({0:?} without a reply)")]
    WatchdogTimeout(Duration),
    #[error("{0}")]
    Opaque(#[from] OpaqueError),
}

/// Reasons a received packet could not be turned into an [`crate::packet::IcmpMessage`].
///
/// Never fatal: the prober treats an undecodable packet as if no matching reply arrived.
#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("packet too short ({len} bytes)")]
    Truncated { len: usize },
    #[error("unexpected ICMP type {icmp_type}")]
    UnexpectedType { icmp_type: u8 },
}

pub type Result<T> = std::result::Result<T, Error>;

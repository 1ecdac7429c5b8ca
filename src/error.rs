//! Error types shared by the whole stack
//!
//! Inbound processing never propagates errors to the sender: malformed
//! datagrams are logged and dropped. Everything a caller can react to
//! (registration, lifecycle, output) returns a [`NetError`].

use std::collections::TryReserveError;
use std::io;
use std::net::Ipv4Addr;

use thiserror::Error;

use crate::device::IfaceFamily;
use crate::network::addr::AddrParseError;

pub type Result<T> = std::result::Result<T, NetError>;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("protocol type 0x{0:04x} is already registered")]
    DuplicateProtocol(u16),

    #[error("ip protocol {0} is already registered")]
    DuplicateIpProtocol(u8),

    #[error("device {dev} already has an interface of family {family:?}")]
    DuplicateIface { dev: String, family: IfaceFamily },

    #[error("no such device: index {0}")]
    UnknownDevice(usize),

    #[error("device {0} is already opened")]
    AlreadyOpened(String),

    #[error("device {0} is not opened")]
    NotOpened(String),

    #[error("no route to host {0}")]
    NoRoute(Ipv4Addr),

    #[error("source address is required for broadcast destinations")]
    SourceRequired,

    #[error("unable to output with source address {0} on that route")]
    WrongSource(Ipv4Addr),

    #[error("too long for device {dev}: mtu={mtu}, len={len}")]
    TooLong { dev: String, mtu: usize, len: usize },

    #[error("device {0} needs address resolution but no resolver is installed")]
    NoResolver(String),

    #[error("address resolution failed for {0}")]
    ResolveFailed(Ipv4Addr),

    #[error("input queue for protocol type 0x{0:04x} is full")]
    QueueFull(u16),

    #[error("memory allocation failed: {0}")]
    NoMemory(#[from] TryReserveError),

    #[error(transparent)]
    Addr(#[from] AddrParseError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

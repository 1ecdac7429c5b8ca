//! ICMP (Internet Control Message Protocol) echo
//!
//! This module provides the ICMP header codec and an upper-layer handler
//! that answers echo requests. It plugs into the IP layer like any other
//! protocol: [`register`] it before the stack runs.

use std::collections::TryReserveError;
use std::net::Ipv4Addr;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use log::{debug, error, info, warn};

use crate::error::Result;
use crate::iface::{IpIface, IpOutput};
use crate::network::checksum;
use crate::network::ipv4::protocol;
use crate::stack::{Stack, StackBuilder};

/// ICMP header length in bytes
pub const ICMP_HEADER_LEN: usize = 8;

/// ICMP message types
pub const ICMP_TYPE_ECHO_REPLY: u8 = 0;
pub const ICMP_TYPE_DEST_UNREACH: u8 = 3;
pub const ICMP_TYPE_ECHO_REQUEST: u8 = 8;
pub const ICMP_TYPE_TIME_EXCEEDED: u8 = 11;

/// ICMP packet header structure
///
/// Represents the standard 8-byte ICMP header as defined in RFC 792
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpHeader {
    pub msg_type: u8,
    pub msg_code: u8,
    pub checksum: u16,
    /// Type-specific word: identifier and sequence for echo messages
    pub values: u32,
}

impl IcmpHeader {
    /// Returns None if the data is too short to contain an ICMP header
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < ICMP_HEADER_LEN {
            return None;
        }

        Some(IcmpHeader {
            msg_type: data[0],
            msg_code: data[1],
            checksum: BigEndian::read_u16(&data[2..4]),
            values: BigEndian::read_u32(&data[4..8]),
        })
    }

    pub fn to_bytes(&self) -> [u8; ICMP_HEADER_LEN] {
        let mut bytes = [0u8; ICMP_HEADER_LEN];
        bytes[0] = self.msg_type;
        bytes[1] = self.msg_code;
        BigEndian::write_u16(&mut bytes[2..4], self.checksum);
        BigEndian::write_u32(&mut bytes[4..8], self.values);
        bytes
    }

    /// Echo identifier (upper half of the values word)
    pub fn identifier(&self) -> u16 {
        (self.values >> 16) as u16
    }

    /// Echo sequence number (lower half of the values word)
    pub fn sequence(&self) -> u16 {
        self.values as u16
    }

    pub fn echo_values(identifier: u16, sequence: u16) -> u32 {
        ((identifier as u32) << 16) | sequence as u32
    }
}

/// Build a complete ICMP message with its checksum over header and data.
pub fn build_message(msg_type: u8, msg_code: u8, values: u32, data: &[u8]) -> std::result::Result<Vec<u8>, TryReserveError> {
    let header = IcmpHeader {
        msg_type,
        msg_code,
        checksum: 0,
        values,
    };
    let mut message = Vec::new();
    message.try_reserve_exact(ICMP_HEADER_LEN + data.len())?;
    message.extend_from_slice(&header.to_bytes());
    message.extend_from_slice(data);
    let sum = checksum(&message);
    BigEndian::write_u16(&mut message[2..4], sum);
    Ok(message)
}

/// Send an ICMP message.
pub fn output(
    stack: &Stack,
    msg_type: u8,
    msg_code: u8,
    values: u32,
    data: &[u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
) -> Result<IpOutput> {
    let message = build_message(msg_type, msg_code, values, data)?;
    debug!("{src} => {dst}, type={msg_type}, len={}", message.len());
    stack.ip_output(protocol::ICMP, &message, src, dst)
}

/// IP protocol handler: answers echo requests, logs everything else.
pub fn input(stack: &Stack, data: &[u8], src: Ipv4Addr, dst: Ipv4Addr, iface: &Arc<IpIface>) {
    let Some(header) = IcmpHeader::from_bytes(data) else {
        warn!("too short, len={}", data.len());
        return;
    };
    if checksum(data) != 0 {
        warn!("checksum error, sum=0x{:04x}", header.checksum);
        return;
    }
    debug!("{src} => {dst}, type={}, len={}", header.msg_type, data.len());

    match header.msg_type {
        ICMP_TYPE_ECHO_REQUEST => {
            // reply from our own address even if the request was a broadcast
            let reply = output(
                stack,
                ICMP_TYPE_ECHO_REPLY,
                header.msg_code,
                header.values,
                &data[ICMP_HEADER_LEN..],
                iface.unicast,
                src,
            );
            match reply {
                Ok(IpOutput::Sent(_)) => {}
                Ok(IpOutput::Pending) => debug!("echo reply to {src} waiting for address resolution"),
                Err(e) => error!("echo reply to {src} failed: {e}"),
            }
        }
        ICMP_TYPE_ECHO_REPLY => info!(
            "echo reply from {src}: id={}, seq={}, len={}",
            header.identifier(),
            header.sequence(),
            data.len() - ICMP_HEADER_LEN
        ),
        other => debug!("ignored icmp type {other}"),
    }
}

pub fn register(builder: &mut StackBuilder) -> Result<()> {
    builder.ip_protocol_register(protocol::ICMP, input)
}

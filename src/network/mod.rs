//! Wire formats of the network layer
//!
//! This module contains the byte-level codecs the stack is built on:
//! - addr: textual <-> binary IPv4 addresses and endpoints
//! - ipv4: Internet Protocol version 4 header
//! - icmp: Internet Control Message Protocol (echo only)

pub mod addr;
pub mod icmp;
pub mod ipv4;

pub use addr::{AddrParseError, Endpoint};
pub use ipv4::{flags, protocol, HeaderError, Ipv4Header};

/// One's-complement sum of `data` as big-endian 16-bit words, folded to
/// 16 bits, starting from `init`.
///
/// An odd trailing byte is padded with zero on the right.
pub fn ones_complement_sum(data: &[u8], init: u32) -> u16 {
    let mut sum = init;

    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        // fold eagerly so very large buffers can't overflow
        if sum > 0xFFFF {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }

    while (sum >> 16) > 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// Internet checksum (RFC 1071).
///
/// Computing it over a region whose checksum field is already correctly
/// filled in yields zero.
pub fn checksum(data: &[u8]) -> u16 {
    !ones_complement_sum(data, 0)
}

//! IPv4 header codec
//!
//! This module reads and writes the fixed 20-byte IPv4 header at fixed
//! offsets in network byte order. Decoding validates lengths before any
//! field is trusted; encoding always emits an unfragmented header without
//! options.
//!
//! Features:
//! - Header parsing with length/version validation
//! - Header checksum generation and verification
//! - Datagram assembly (header + payload)
//! - Human-readable header dump for trace logging

use std::collections::TryReserveError;
use std::fmt;
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use crate::network::checksum;

pub const IPV4_HEADER_MIN_LEN: usize = 20;
pub const IPV4_HEADER_MAX_LEN: usize = 60;
pub const IPV4_TOTAL_MAX_LEN: usize = u16::MAX as usize;
pub const IPV4_VERSION: u8 = 4;
pub const DEFAULT_TTL: u8 = 255;

/// Reasons a received buffer is not a usable IPv4 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("too short for an ip header: len={0}")]
    TooShort(usize),
    #[error("version must be 4, got {0}")]
    BadVersion(u8),
    #[error("header length {0} is below the minimum")]
    HeaderLenTooSmall(usize),
    #[error("header length {hlen} exceeds received length {len}")]
    HeaderLenTooLarge { hlen: usize, len: usize },
    #[error("total length {total} exceeds received length {len}")]
    TotalLenTooLarge { total: usize, len: usize },
    #[error("total length {total} is shorter than header length {hlen}")]
    TotalLenTooSmall { total: usize, hlen: usize },
}

/// IPv4 packet header structure
///
/// Represents the IPv4 header as defined in RFC 791. Options, if present
/// on a received datagram, are skipped but not decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version: u8,
    pub ihl: u8, // Internet Header Length, in 32-bit words
    pub tos: u8, // Type of Service
    pub total_len: u16,
    pub id: u16,
    pub flags_frag_offset: u16, // Flags (3 bits) and Fragment Offset (13 bits)
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
}

impl Ipv4Header {
    /// Header for an outbound, unfragmented datagram without options.
    ///
    /// The checksum is left at zero; call [`Ipv4Header::fill_checksum`].
    pub fn new(protocol: u8, src_addr: Ipv4Addr, dst_addr: Ipv4Addr, payload_len: u16, id: u16) -> Self {
        Ipv4Header {
            version: IPV4_VERSION,
            ihl: (IPV4_HEADER_MIN_LEN / 4) as u8,
            tos: 0,
            total_len: IPV4_HEADER_MIN_LEN as u16 + payload_len,
            id,
            flags_frag_offset: 0,
            ttl: DEFAULT_TTL,
            protocol,
            checksum: 0,
            src_addr,
            dst_addr,
        }
    }

    /// Parse and validate the header at the start of `data`.
    ///
    /// `data` is everything that arrived, so the declared header length and
    /// total length are both checked against it. The checksum is NOT
    /// verified here; see [`Ipv4Header::verify_checksum`].
    pub fn parse(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < IPV4_HEADER_MIN_LEN {
            return Err(HeaderError::TooShort(data.len()));
        }

        let version = (data[0] & 0xF0) >> 4;
        if version != IPV4_VERSION {
            return Err(HeaderError::BadVersion(version));
        }

        let ihl = data[0] & 0x0F;
        let hlen = (ihl as usize) * 4;
        if hlen < IPV4_HEADER_MIN_LEN {
            return Err(HeaderError::HeaderLenTooSmall(hlen));
        }
        if hlen > data.len() {
            return Err(HeaderError::HeaderLenTooLarge { hlen, len: data.len() });
        }

        let total_len = BigEndian::read_u16(&data[2..4]);
        let total = total_len as usize;
        if total > data.len() {
            return Err(HeaderError::TotalLenTooLarge { total, len: data.len() });
        }
        if total < hlen {
            return Err(HeaderError::TotalLenTooSmall { total, hlen });
        }

        Ok(Ipv4Header {
            version,
            ihl,
            tos: data[1],
            total_len,
            id: BigEndian::read_u16(&data[4..6]),
            flags_frag_offset: BigEndian::read_u16(&data[6..8]),
            ttl: data[8],
            protocol: data[9],
            checksum: BigEndian::read_u16(&data[10..12]),
            src_addr: Ipv4Addr::from(BigEndian::read_u32(&data[12..16])),
            dst_addr: Ipv4Addr::from(BigEndian::read_u32(&data[16..20])),
        })
    }

    /// True if the header bytes at the start of `data` (options included)
    /// sum to zero. `data` must hold at least `header_len()` bytes.
    pub fn verify_checksum(&self, data: &[u8]) -> bool {
        checksum(&data[..self.header_len()]) == 0
    }

    /// Serialize the fixed 20-byte part of the header.
    pub fn to_bytes(&self) -> [u8; IPV4_HEADER_MIN_LEN] {
        let mut bytes = [0u8; IPV4_HEADER_MIN_LEN];
        bytes[0] = (self.version << 4) | self.ihl;
        bytes[1] = self.tos;
        BigEndian::write_u16(&mut bytes[2..4], self.total_len);
        BigEndian::write_u16(&mut bytes[4..6], self.id);
        BigEndian::write_u16(&mut bytes[6..8], self.flags_frag_offset);
        bytes[8] = self.ttl;
        bytes[9] = self.protocol;
        BigEndian::write_u16(&mut bytes[10..12], self.checksum);
        BigEndian::write_u32(&mut bytes[12..16], u32::from(self.src_addr));
        BigEndian::write_u32(&mut bytes[16..20], u32::from(self.dst_addr));
        bytes
    }

    /// Recompute the checksum with the checksum field treated as zero.
    pub fn fill_checksum(&mut self) {
        self.checksum = 0;
        self.checksum = checksum(&self.to_bytes());
    }

    /// Get the header length in bytes
    pub fn header_len(&self) -> usize {
        (self.ihl as usize) * 4
    }

    /// Total length minus header length
    pub fn payload_len(&self) -> usize {
        (self.total_len as usize).saturating_sub(self.header_len())
    }

    pub fn more_fragments(&self) -> bool {
        self.flags_frag_offset & flags::MORE_FRAGMENTS != 0
    }

    pub fn fragment_offset(&self) -> u16 {
        self.flags_frag_offset & flags::FRAGMENT_OFFSET_MASK
    }

    /// True for any piece of a fragmented datagram.
    pub fn is_fragment(&self) -> bool {
        self.more_fragments() || self.fragment_offset() != 0
    }
}

/// Multi-line dump used for trace logging
impl fmt::Display for Ipv4Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hlen = self.header_len();
        writeln!(
            f,
            "        vhl: 0x{:02x} [v: {}, hl: {}, ({})]",
            (self.version << 4) | self.ihl,
            self.version,
            self.ihl,
            hlen
        )?;
        writeln!(f, "        tos: 0x{:02x}", self.tos)?;
        writeln!(f, "      total: {} (payload: {})", self.total_len, self.payload_len())?;
        writeln!(f, "         id: {}", self.id)?;
        writeln!(
            f,
            "     offset: 0x{:04x} [flags={:x}, offset={}]",
            self.flags_frag_offset,
            (self.flags_frag_offset & 0xe000) >> 13,
            self.fragment_offset()
        )?;
        writeln!(f, "        ttl: {}", self.ttl)?;
        writeln!(f, "   protocol: {}", self.protocol)?;
        writeln!(f, "        sum: 0x{:04x}", self.checksum)?;
        writeln!(f, "        src: {}", self.src_addr)?;
        write!(f, "        dst: {}", self.dst_addr)
    }
}

/// Assemble a datagram: `header` (checksum already filled) followed by
/// `payload`.
pub fn build_datagram(header: &Ipv4Header, payload: &[u8]) -> Result<Vec<u8>, TryReserveError> {
    let mut datagram = Vec::new();
    datagram.try_reserve_exact(IPV4_HEADER_MIN_LEN + payload.len())?;
    datagram.extend_from_slice(&header.to_bytes());
    datagram.extend_from_slice(payload);
    Ok(datagram)
}

/// IP protocol numbers
pub mod protocol {
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
}

/// IPv4 flags constants
pub mod flags {
    pub const DONT_FRAGMENT: u16 = 0x4000;
    pub const MORE_FRAGMENTS: u16 = 0x2000;
    pub const FRAGMENT_OFFSET_MASK: u16 = 0x1FFF;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut header = Ipv4Header::new(
            protocol::UDP,
            Ipv4Addr::new(192, 168, 1, 1),
            Ipv4Addr::new(192, 168, 1, 2),
            4,
            128,
        );
        header.fill_checksum();
        build_datagram(&header, b"ping").unwrap()
    }

    #[test]
    fn test_outbound_header_fields() {
        let data = sample();
        assert_eq!(data.len(), 24);
        assert_eq!(data[0], 0x45);
        assert_eq!(data[1], 0);
        assert_eq!(&data[2..4], &[0, 24]);
        assert_eq!(&data[4..6], &[0, 128]);
        assert_eq!(&data[6..8], &[0, 0]);
        assert_eq!(data[8], 255);
        assert_eq!(data[9], protocol::UDP);
        assert_eq!(&data[12..16], &[192, 168, 1, 1]);
        assert_eq!(&data[16..20], &[192, 168, 1, 2]);
        assert_eq!(&data[20..], b"ping");
    }

    #[test]
    fn test_parse_and_verify() {
        let data = sample();
        let header = Ipv4Header::parse(&data).unwrap();
        assert!(header.verify_checksum(&data));
        assert_eq!(header.header_len(), 20);
        assert_eq!(header.payload_len(), 4);
        assert!(!header.is_fragment());
        assert_eq!(header.src_addr, Ipv4Addr::new(192, 168, 1, 1));
    }

    #[test]
    fn test_corrupted_header_fails_checksum() {
        let data = sample();
        for i in 0..IPV4_HEADER_MIN_LEN {
            let mut corrupted = data.clone();
            corrupted[i] ^= 0x5a;
            // some corruptions are caught earlier by length/version checks
            if let Ok(header) = Ipv4Header::parse(&corrupted) {
                assert!(!header.verify_checksum(&corrupted), "byte {i} went unnoticed");
            }
        }
    }

    #[test]
    fn test_parse_rejects_short_buffer() {
        assert_eq!(Ipv4Header::parse(&[0x45; 19]), Err(HeaderError::TooShort(19)));
    }

    #[test]
    fn test_parse_rejects_bad_version() {
        let mut data = sample();
        data[0] = 0x65;
        assert_eq!(Ipv4Header::parse(&data), Err(HeaderError::BadVersion(6)));
    }

    #[test]
    fn test_parse_rejects_header_len() {
        let mut data = sample();
        data[0] = 0x44;
        assert_eq!(Ipv4Header::parse(&data), Err(HeaderError::HeaderLenTooSmall(16)));
        data[0] = 0x4f;
        assert_eq!(
            Ipv4Header::parse(&data),
            Err(HeaderError::HeaderLenTooLarge { hlen: 60, len: 24 })
        );
    }

    #[test]
    fn test_parse_rejects_total_len_beyond_received() {
        let mut data = sample();
        BigEndian::write_u16(&mut data[2..4], 100);
        assert_eq!(
            Ipv4Header::parse(&data),
            Err(HeaderError::TotalLenTooLarge { total: 100, len: 24 })
        );
    }

    #[test]
    fn test_fragment_detection() {
        let mut data = sample();
        BigEndian::write_u16(&mut data[6..8], flags::MORE_FRAGMENTS);
        assert!(Ipv4Header::parse(&data).unwrap().is_fragment());
        BigEndian::write_u16(&mut data[6..8], 3);
        assert!(Ipv4Header::parse(&data).unwrap().is_fragment());
        BigEndian::write_u16(&mut data[6..8], flags::DONT_FRAGMENT);
        assert!(!Ipv4Header::parse(&data).unwrap().is_fragment());
    }
}

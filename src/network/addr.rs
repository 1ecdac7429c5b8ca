//! Textual address formats
//!
//! Dotted-quad IPv4 addresses (`"A.B.C.D"`) and endpoints
//! (`"A.B.C.D:PORT"`). Octets may carry leading zeros on input; output is
//! always canonical, so `parse(format(a)) == a` for every address.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid address: {0:?}")]
pub struct AddrParseError(pub String);

impl AddrParseError {
    fn new(s: &str) -> Self {
        AddrParseError(s.to_string())
    }
}

/// Parse an unsigned decimal made of ASCII digits only (no sign, no spaces).
fn parse_decimal(s: &str, max: u32) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut value: u32 = 0;
    for b in s.bytes() {
        value = value.checked_mul(10)?.checked_add((b - b'0') as u32)?;
        if value > max {
            return None;
        }
    }
    Some(value)
}

/// Parse a dotted-quad address: exactly four decimal components in 0..=255.
pub fn parse_addr(s: &str) -> Result<Ipv4Addr, AddrParseError> {
    let mut octets = [0u8; 4];
    let mut parts = s.split('.');
    for octet in octets.iter_mut() {
        let part = parts.next().ok_or_else(|| AddrParseError::new(s))?;
        *octet = parse_decimal(part, 255).ok_or_else(|| AddrParseError::new(s))? as u8;
    }
    if parts.next().is_some() {
        return Err(AddrParseError::new(s));
    }
    Ok(Ipv4Addr::from(octets))
}

/// An IPv4 address paired with a transport port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(addr: Ipv4Addr, port: u16) -> Self {
        Endpoint { addr, port }
    }
}

impl FromStr for Endpoint {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, port) = s.rsplit_once(':').ok_or_else(|| AddrParseError::new(s))?;
        let addr = parse_addr(addr).map_err(|_| AddrParseError::new(s))?;
        let port = match parse_decimal(port, u16::MAX as u32) {
            Some(port) if port > 0 => port as u16,
            _ => return Err(AddrParseError::new(s)),
        };
        Ok(Endpoint { addr, port })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

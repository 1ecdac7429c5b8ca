//! Network-layer interfaces and IPv4 processing
//!
//! This module provides the IPv4 side of the stack:
//! - Interface and upper-layer protocol registries
//! - Longest-prefix-match routing
//! - Inbound validation/dispatch and outbound datagram transmission

pub mod ip;
pub mod ipv4;
pub mod route;

// Re-export commonly used items
pub use ip::{AddressResolver, IpIface, IpLayer, IpProtocolHandler, Resolution};
pub use ipv4::IpOutput;
pub use route::{Route, RouteTable};

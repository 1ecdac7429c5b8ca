//! A user-space IPv4 network stack
//!
//! This library provides the core of a small network stack:
//! - Device registry with pluggable drivers (loopback, dummy, tun)
//! - Link-layer protocol dispatch through per-protocol FIFOs drained in a
//!   softirq-style consumer thread
//! - IPv4 input validation, longest-prefix routing and output with
//!   link-layer address resolution
//! - Periodic timers and broadcast events on the same consumer thread

pub mod config;
pub mod device;
pub mod error;
pub mod iface;
mod intr;
pub mod network;
pub mod protocol;
pub mod stack;
pub mod timer;

// Re-export commonly used types
pub use config::StackConfig;
pub use device::{Device, DeviceFlags, DeviceId, DeviceType, Driver, HwAddr};
pub use error::{NetError, Result};
pub use iface::{AddressResolver, IpIface, IpOutput, Resolution};
pub use network::{Endpoint, Ipv4Header};
pub use protocol::{ether_type, RxHandle};
pub use stack::{RunningStack, Stack, StackBuilder};

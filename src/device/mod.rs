//! Network devices and the device registry
//!
//! A [`Device`] is the link-layer endpoint: static identity (type, MTU,
//! hardware addresses, flags), a [`Driver`] providing the open/close/transmit
//! capability set, and the network-layer interfaces attached to it (at most
//! one per address family).
//!
//! Devices are registered while the stack is being built and are never
//! mutated afterwards, except for the UP flag toggled by open/close.

pub mod dummy;
pub mod loopback;
pub mod tun;

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use log::{debug, error, info, warn};

use crate::error::{NetError, Result};
use crate::iface::IpIface;
use crate::protocol::RxHandle;

/// Position of a device in the registry; also the number in its name.
pub type DeviceId = usize;

pub const HW_ADDR_MAX_LEN: usize = 16;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceFlags: u16 {
        const UP = 0x0001;
        const LOOPBACK = 0x0010;
        const BROADCAST = 0x0020;
        const P2P = 0x0040;
        const NEED_ARP = 0x0100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Dummy,
    Loopback,
    Ethernet,
    Tun,
}

impl DeviceType {
    pub fn code(&self) -> u16 {
        match self {
            DeviceType::Dummy => 0x0000,
            DeviceType::Loopback => 0x0001,
            DeviceType::Ethernet => 0x0002,
            DeviceType::Tun => 0x0003,
        }
    }
}

/// Link-layer hardware address of up to [`HW_ADDR_MAX_LEN`] bytes.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct HwAddr {
    bytes: [u8; HW_ADDR_MAX_LEN],
    len: u8,
}

impl HwAddr {
    /// Longer inputs are truncated to [`HW_ADDR_MAX_LEN`].
    pub fn new(addr: &[u8]) -> Self {
        let len = addr.len().min(HW_ADDR_MAX_LEN);
        let mut bytes = [0u8; HW_ADDR_MAX_LEN];
        bytes[..len].copy_from_slice(&addr[..len]);
        HwAddr { bytes, len: len as u8 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Capability set a link-layer driver provides.
///
/// `open` receives the handle the driver uses to feed received frames into
/// the stack; drivers that never receive may ignore it.
pub trait Driver: Send + Sync {
    fn open(&self, _dev: &Device, _rx: RxHandle) -> io::Result<()> {
        Ok(())
    }

    fn close(&self, _dev: &Device) -> io::Result<()> {
        Ok(())
    }

    fn transmit(&self, dev: &Device, ty: u16, data: &[u8], dst: Option<&HwAddr>) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfaceFamily {
    Ip,
}

/// A network-layer interface attached to a device.
#[derive(Debug, Clone)]
pub enum Iface {
    Ip(Arc<IpIface>),
}

impl Iface {
    pub fn family(&self) -> IfaceFamily {
        match self {
            Iface::Ip(_) => IfaceFamily::Ip,
        }
    }
}

pub struct Device {
    index: DeviceId,
    name: String,
    kind: DeviceType,
    mtu: usize,
    flags: AtomicU16,
    hw_addr: HwAddr,
    broadcast: HwAddr,
    ifaces: Vec<Iface>,
    driver: Box<dyn Driver>,
}

impl Device {
    /// A new, unregistered device. Index and name are assigned by
    /// [`DeviceRegistry::register`]. The UP flag is ignored; devices start
    /// down and come up when opened.
    pub fn new(kind: DeviceType, mtu: usize, flags: DeviceFlags, driver: Box<dyn Driver>) -> Self {
        Device {
            index: 0,
            name: String::new(),
            kind,
            mtu,
            flags: AtomicU16::new((flags - DeviceFlags::UP).bits()),
            hw_addr: HwAddr::default(),
            broadcast: HwAddr::default(),
            ifaces: Vec::new(),
            driver,
        }
    }

    pub fn with_hw_addr(mut self, addr: HwAddr) -> Self {
        self.hw_addr = addr;
        self
    }

    pub fn with_broadcast(mut self, addr: HwAddr) -> Self {
        self.broadcast = addr;
        self
    }

    pub fn index(&self) -> DeviceId {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DeviceType {
        self.kind
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn hw_addr(&self) -> &HwAddr {
        &self.hw_addr
    }

    pub fn broadcast(&self) -> &HwAddr {
        &self.broadcast
    }

    pub fn flags(&self) -> DeviceFlags {
        DeviceFlags::from_bits_retain(self.flags.load(Ordering::Acquire))
    }

    pub fn is_up(&self) -> bool {
        self.flags().contains(DeviceFlags::UP)
    }

    pub fn needs_arp(&self) -> bool {
        self.flags().contains(DeviceFlags::NEED_ARP)
    }

    pub fn state(&self) -> &'static str {
        if self.is_up() {
            "up"
        } else {
            "down"
        }
    }

    /// Attach a network-layer interface. Only one per family.
    pub fn add_iface(&mut self, iface: Iface) -> Result<()> {
        if self.get_iface(iface.family()).is_some() {
            error!("already exists, dev={}, family={:?}", self.name, iface.family());
            return Err(NetError::DuplicateIface {
                dev: self.name.clone(),
                family: iface.family(),
            });
        }
        self.ifaces.try_reserve(1)?;
        self.ifaces.push(iface);
        Ok(())
    }

    pub fn get_iface(&self, family: IfaceFamily) -> Option<&Iface> {
        self.ifaces.iter().find(|iface| iface.family() == family)
    }

    pub fn ip_iface(&self) -> Option<&Arc<IpIface>> {
        match self.get_iface(IfaceFamily::Ip)? {
            Iface::Ip(iface) => Some(iface),
        }
    }

    pub fn open(&self, rx: RxHandle) -> Result<()> {
        if self.is_up() {
            error!("already opened, dev={}", self.name);
            return Err(NetError::AlreadyOpened(self.name.clone()));
        }
        self.driver.open(self, rx).map_err(|e| {
            error!("failure, dev={}, err={e}", self.name);
            NetError::Io(e)
        })?;
        self.flags.fetch_or(DeviceFlags::UP.bits(), Ordering::AcqRel);
        info!("dev={}, state={}", self.name, self.state());
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        if !self.is_up() {
            error!("not opened, dev={}", self.name);
            return Err(NetError::NotOpened(self.name.clone()));
        }
        self.driver.close(self).map_err(|e| {
            error!("failure, dev={}, err={e}", self.name);
            NetError::Io(e)
        })?;
        self.flags.fetch_and(!DeviceFlags::UP.bits(), Ordering::AcqRel);
        info!("dev={}, state={}", self.name, self.state());
        Ok(())
    }

    /// Hand a frame to the driver.
    ///
    /// Exceeding the MTU is reported but the transmit is still attempted.
    pub fn output(&self, ty: u16, data: &[u8], dst: Option<&HwAddr>) -> Result<()> {
        if !self.is_up() {
            error!("not opened, dev={}", self.name);
            return Err(NetError::NotOpened(self.name.clone()));
        }
        if data.len() > self.mtu {
            warn!("too long, dev={}, mtu={}, len={}", self.name, self.mtu, data.len());
        }
        debug!("dev={}, type=0x{:04x}, len={}", self.name, ty, data.len());
        self.driver.transmit(self, ty, data, dst).map_err(|e| {
            error!("device transmit failed, dev={}, len={}, err={e}", self.name, data.len());
            NetError::Io(e)
        })
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("mtu", &self.mtu)
            .field("flags", &self.flags())
            .field("hw_addr", &self.hw_addr)
            .field("ifaces", &self.ifaces)
            .finish_non_exhaustive()
    }
}

/// Owns every device known to the stack.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    /// Assign the next index and a `netN` name, then take ownership.
    pub fn register(&mut self, mut dev: Device) -> Result<DeviceId> {
        self.devices.try_reserve(1)?;
        dev.index = self.devices.len();
        dev.name = format!("net{}", dev.index);
        info!("registered, dev={}, type=0x{:04x}", dev.name, dev.kind.code());
        self.devices.push(dev);
        Ok(self.devices.len() - 1)
    }

    pub fn get(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

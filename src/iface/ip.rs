use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, PoisonError};

use log::{error, info, warn};

use crate::device::{Device, DeviceId, HwAddr, Iface};
use crate::error::{NetError, Result};
use crate::iface::route::RouteTable;
use crate::network::addr::{parse_addr, AddrParseError};
use crate::stack::Stack;

/// First identification value handed out by [`IpLayer::next_id`].
pub const IP_ID_START: u16 = 128;

/// Signature of an upper-layer protocol handler:
/// `(stack, payload, source, destination, receiving interface)`.
pub type IpProtocolHandler = Box<dyn Fn(&Stack, &[u8], Ipv4Addr, Ipv4Addr, &Arc<IpIface>) + Send + Sync>;

/// An IPv4 interface: unicast address and netmask on one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpIface {
    dev: DeviceId,
    pub unicast: Ipv4Addr,
    pub netmask: Ipv4Addr,
    /// Subnet broadcast, `(unicast & netmask) | !netmask`
    pub broadcast: Ipv4Addr,
}

impl IpIface {
    /// An interface not yet attached to any device; it is bound to one
    /// when registered with the stack.
    pub fn new(unicast: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        let mask = u32::from(netmask);
        let broadcast = Ipv4Addr::from((u32::from(unicast) & mask) | !mask);
        IpIface {
            dev: 0,
            unicast,
            netmask,
            broadcast,
        }
    }

    /// Same as [`IpIface::new`] from dotted-quad strings.
    pub fn parse(unicast: &str, netmask: &str) -> std::result::Result<Self, AddrParseError> {
        Ok(IpIface::new(parse_addr(unicast)?, parse_addr(netmask)?))
    }

    /// The device this interface is attached to.
    pub fn dev(&self) -> DeviceId {
        self.dev
    }

    pub(crate) fn attach(&mut self, dev: DeviceId) {
        self.dev = dev;
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.unicast) & u32::from(self.netmask))
    }

    /// True if a datagram addressed to `dst` should be accepted here.
    pub fn accepts(&self, dst: Ipv4Addr) -> bool {
        dst == self.unicast || dst == self.broadcast || dst == Ipv4Addr::BROADCAST
    }
}

/// Outcome of an address resolution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Resolved(HwAddr),
    /// A request is in flight; the caller may retry later.
    Pending,
}

/// Maps a next-hop address to a link-layer address (ARP for ethernet).
///
/// Hard failures are reported as `Err`, typically
/// [`NetError::ResolveFailed`].
pub trait AddressResolver: Send + Sync {
    fn resolve(&self, stack: &Stack, dev: &Device, iface: &IpIface, target: Ipv4Addr) -> Result<Resolution>;
}

struct IpProtocol {
    proto: u8,
    handler: IpProtocolHandler,
}

/// IPv4 layer state: interfaces, upper-layer protocols, routes and the
/// identification counter.
pub struct IpLayer {
    ifaces: Vec<Arc<IpIface>>,
    protocols: Vec<IpProtocol>,
    routes: RouteTable,
    resolver: Option<Box<dyn AddressResolver>>,
    next_id: Mutex<u16>,
}

impl Default for IpLayer {
    fn default() -> Self {
        IpLayer {
            ifaces: Vec::new(),
            protocols: Vec::new(),
            routes: RouteTable::default(),
            resolver: None,
            next_id: Mutex::new(IP_ID_START),
        }
    }
}

impl IpLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `iface` to `dev`, add its directly connected route and
    /// record it. The device must not already carry an IP interface.
    pub(crate) fn iface_register(&mut self, dev: &mut Device, mut iface: IpIface) -> Result<Arc<IpIface>> {
        iface.attach(dev.index());
        let iface = Arc::new(iface);
        dev.add_iface(Iface::Ip(Arc::clone(&iface)))?;
        self.routes
            .add(iface.network(), iface.netmask, None, Arc::clone(&iface))?;
        self.ifaces.try_reserve(1)?;
        self.ifaces.push(Arc::clone(&iface));
        info!(
            "registered: dev={}, unicast={}, netmask={}, broadcast={}",
            dev.name(),
            iface.unicast,
            iface.netmask,
            iface.broadcast
        );
        Ok(iface)
    }

    pub(crate) fn protocol_register(&mut self, proto: u8, handler: IpProtocolHandler) -> Result<()> {
        if self.protocols.iter().any(|entry| entry.proto == proto) {
            error!("{proto} is already registered");
            return Err(NetError::DuplicateIpProtocol(proto));
        }
        self.protocols.try_reserve(1)?;
        self.protocols.push(IpProtocol { proto, handler });
        info!("registered, type={proto}");
        Ok(())
    }

    pub(crate) fn routes_mut(&mut self) -> &mut RouteTable {
        &mut self.routes
    }

    pub(crate) fn set_resolver(&mut self, resolver: Box<dyn AddressResolver>) {
        self.resolver = Some(resolver);
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn ifaces(&self) -> impl Iterator<Item = &Arc<IpIface>> {
        self.ifaces.iter()
    }

    pub(crate) fn resolver(&self) -> Option<&dyn AddressResolver> {
        self.resolver.as_deref()
    }

    pub(crate) fn handler(&self, proto: u8) -> Option<&IpProtocolHandler> {
        self.protocols
            .iter()
            .find(|entry| entry.proto == proto)
            .map(|entry| &entry.handler)
    }

    /// Interface whose unicast address is `addr`.
    pub fn iface_select(&self, addr: Ipv4Addr) -> Option<&Arc<IpIface>> {
        let found = self.ifaces.iter().find(|iface| iface.unicast == addr);
        if found.is_none() {
            warn!("no interface has address {addr}");
        }
        found
    }

    /// Next datagram identification. Wraps silently.
    pub fn next_id(&self) -> u16 {
        let mut id = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
        let ret = *id;
        *id = id.wrapping_add(1);
        ret
    }
}

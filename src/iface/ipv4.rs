//! IPv4 datagram processing
//!
//! Inbound: validate -> checksum -> reject fragments -> destination check ->
//! dispatch to the registered upper-layer protocol. Every failure on this
//! path is a logged drop; nothing is reported back to the sender.
//!
//! Outbound: route lookup, source check, header construction and link-layer
//! address resolution before handing the datagram to the device.

use std::net::Ipv4Addr;
use std::sync::Arc;

use log::{debug, error, trace, warn};

use crate::device::{Device, HwAddr};
use crate::error::{NetError, Result};
use crate::iface::ip::{IpIface, Resolution};
use crate::network::ipv4::{build_datagram, Ipv4Header, IPV4_HEADER_MIN_LEN, IPV4_TOTAL_MAX_LEN};
use crate::protocol::ether_type;
use crate::stack::Stack;

/// Result of a successful [`Stack::ip_output`] call.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpOutput {
    /// The datagram was handed to the device; carries the payload length.
    Sent(usize),
    /// The next hop's link-layer address is still being resolved. Nothing
    /// was transmitted; the caller may retry.
    Pending,
}

/// Link-layer protocol handler for [`ether_type::IP`].
pub(crate) fn input(stack: &Stack, data: &[u8], dev: &Device) {
    let header = match Ipv4Header::parse(data) {
        Ok(header) => header,
        Err(e) => {
            warn!("dropped, dev={}: {e}", dev.name());
            return;
        }
    };

    if !header.verify_checksum(data) {
        warn!("dropped, dev={}: checksum validation failed", dev.name());
        return;
    }

    if header.is_fragment() {
        warn!("dropped, dev={}: fragments are not supported", dev.name());
        return;
    }

    let Some(iface) = dev.ip_iface() else {
        warn!("dropped, dev={}: no ip interface", dev.name());
        return;
    };
    if !iface.accepts(header.dst_addr) {
        trace!("not for us, dev={}, dst={}", dev.name(), header.dst_addr);
        return;
    }

    debug!(
        "dev={}, iface={}, protocol={}, total={}",
        dev.name(),
        iface.unicast,
        header.protocol,
        header.total_len
    );
    trace!("\n{header}");

    let payload = &data[header.header_len()..header.total_len as usize];
    match stack.ip().handler(header.protocol) {
        Some(handler) => handler(stack, payload, header.src_addr, header.dst_addr, iface),
        None => debug!("unsupported protocol {}", header.protocol),
    }
}

impl Stack {
    /// Send `data` as the payload of an IPv4 datagram.
    ///
    /// `src` may be [`Ipv4Addr::UNSPECIFIED`], in which case the outbound
    /// interface's address is used; broadcasts require an explicit source.
    pub fn ip_output(&self, protocol: u8, data: &[u8], src: Ipv4Addr, dst: Ipv4Addr) -> Result<IpOutput> {
        if src.is_unspecified() && dst.is_broadcast() {
            error!("source address is required for broadcast addresses");
            return Err(NetError::SourceRequired);
        }

        let Some(route) = self.ip().routes().lookup(dst) else {
            error!("no route to host, addr={dst}");
            return Err(NetError::NoRoute(dst));
        };
        let iface = Arc::clone(&route.iface);
        if !src.is_unspecified() && src != iface.unicast {
            error!("unable to output with specified source address, addr={src}");
            return Err(NetError::WrongSource(src));
        }
        let nexthop = route.nexthop_for(dst);

        let dev = self.device(iface.dev()).ok_or(NetError::UnknownDevice(iface.dev()))?;
        let total = IPV4_HEADER_MIN_LEN + data.len();
        if total > dev.mtu().min(IPV4_TOTAL_MAX_LEN) {
            error!("too long, dev={}, mtu={} < {}", dev.name(), dev.mtu(), total);
            return Err(NetError::TooLong {
                dev: dev.name().to_string(),
                mtu: dev.mtu(),
                len: total,
            });
        }

        let id = self.ip().next_id();
        let mut header = Ipv4Header::new(protocol, iface.unicast, dst, data.len() as u16, id);
        header.fill_checksum();
        let datagram = build_datagram(&header, data)?;
        debug!(
            "dev={}, dst={}, protocol={}, len={}",
            dev.name(),
            dst,
            protocol,
            total
        );
        trace!("\n{header}");

        match self.output_device(dev, &iface, &datagram, nexthop)? {
            IpOutput::Pending => Ok(IpOutput::Pending),
            IpOutput::Sent(_) => Ok(IpOutput::Sent(data.len())),
        }
    }

    fn output_device(&self, dev: &Device, iface: &IpIface, datagram: &[u8], nexthop: Ipv4Addr) -> Result<IpOutput> {
        let mut hw_addr: Option<HwAddr> = None;
        if dev.needs_arp() {
            if nexthop == iface.broadcast || nexthop.is_broadcast() {
                hw_addr = Some(*dev.broadcast());
            } else {
                let Some(resolver) = self.ip().resolver() else {
                    error!("no address resolver, dev={}", dev.name());
                    return Err(NetError::NoResolver(dev.name().to_string()));
                };
                match resolver.resolve(self, dev, iface, nexthop)? {
                    Resolution::Resolved(addr) => hw_addr = Some(addr),
                    Resolution::Pending => {
                        debug!("address resolution pending, nexthop={nexthop}");
                        return Ok(IpOutput::Pending);
                    }
                }
            }
        }
        dev.output(ether_type::IP, datagram, hw_addr.as_ref())?;
        Ok(IpOutput::Sent(datagram.len()))
    }
}

//! IPv4 routing table
//!
//! Routes are only ever added. Lookup is a linear scan choosing the most
//! specific (longest netmask) matching route, independent of the order the
//! routes were added in.

use std::net::Ipv4Addr;
use std::sync::Arc;

use log::info;

use crate::error::Result;
use crate::iface::ip::IpIface;

#[derive(Debug, Clone)]
pub struct Route {
    pub network: Ipv4Addr,
    pub netmask: Ipv4Addr,
    /// `None` for directly connected networks: the destination itself is
    /// the next hop.
    pub nexthop: Option<Ipv4Addr>,
    pub iface: Arc<IpIface>,
}

impl Route {
    pub fn matches(&self, dst: Ipv4Addr) -> bool {
        u32::from(dst) & u32::from(self.netmask) == u32::from(self.network)
    }

    /// Where a datagram for `dst` is handed at the link layer.
    pub fn nexthop_for(&self, dst: Ipv4Addr) -> Ipv4Addr {
        self.nexthop.unwrap_or(dst)
    }
}

#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn add(
        &mut self,
        network: Ipv4Addr,
        netmask: Ipv4Addr,
        nexthop: Option<Ipv4Addr>,
        iface: Arc<IpIface>,
    ) -> Result<()> {
        self.routes.try_reserve(1)?;
        info!(
            "network={network}, netmask={netmask}, nexthop={}, iface={}, dev={}",
            nexthop.unwrap_or(Ipv4Addr::UNSPECIFIED),
            iface.unicast,
            iface.dev()
        );
        self.routes.push(Route {
            network,
            netmask,
            nexthop,
            iface,
        });
        Ok(())
    }

    /// Longest-prefix match. Among equally specific routes the most
    /// recently added wins.
    pub fn lookup(&self, dst: Ipv4Addr) -> Option<&Route> {
        let mut candidate: Option<&Route> = None;
        for route in self.routes.iter().rev() {
            if !route.matches(dst) {
                continue;
            }
            match candidate {
                Some(best) if u32::from(best.netmask) >= u32::from(route.netmask) => {}
                _ => candidate = Some(route),
            }
        }
        candidate
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

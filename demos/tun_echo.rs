//! Answer pings on a tun device.
//!
//! Needs CAP_NET_ADMIN. The host side gets 10.0.0.254/24 and the stack
//! answers as 10.0.0.1, so `ping 10.0.0.1` from the host reaches it.
//!
//! Usage: tun_echo [tun-name]

mod utils;

use std::thread;
use std::time::Duration;

use log::info;
use toy_netstack::device::tun;
use toy_netstack::network::icmp;
use toy_netstack::{IpIface, StackBuilder, StackConfig};

use utils::network::configure_interface;

const HOST_CIDR: &str = "10.0.0.254/24";
const STACK_ADDR: &str = "10.0.0.1";
const STACK_NETMASK: &str = "255.255.255.0";
const GATEWAY: &str = "10.0.0.254";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    utils::logger::init();

    let tun_name = std::env::args().nth(1).unwrap_or_else(|| "tun0".to_string());
    let dev = tun::device(&tun_name)?;
    configure_interface(&tun_name, HOST_CIDR)?;

    let mut builder = StackBuilder::new(StackConfig::default())?;
    let dev = builder.device_register(dev)?;
    let iface = builder.ip_iface_register(dev, IpIface::parse(STACK_ADDR, STACK_NETMASK)?)?;
    builder.route_set_default_gateway(&iface, GATEWAY)?;
    icmp::register(&mut builder)?;

    let _running = builder.run()?;
    info!("answering on {tun_name} as {STACK_ADDR}");
    println!("Try: ping {STACK_ADDR}");
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

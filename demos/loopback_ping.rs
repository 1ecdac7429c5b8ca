//! Ping ourselves over the loopback device.
//!
//! Usage: loopback_ping [seconds]

mod utils;

use std::io;
use std::net::Ipv4Addr;
use std::thread;
use std::time::Duration;

use toy_netstack::device::loopback;
use toy_netstack::network::icmp::{self, IcmpHeader, ICMP_TYPE_ECHO_REQUEST};
use toy_netstack::{IpIface, IpOutput, Stack, StackBuilder, StackConfig};

const LOOPBACK_ADDR: &str = "127.0.0.1";
const LOOPBACK_NETMASK: &str = "255.0.0.0";
const PING_ID: u16 = 0x1234;
const PAYLOAD: &[u8] = b"toy-netstack loopback ping";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    utils::logger::init();

    let seconds = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<u64>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?,
        None => 5,
    };

    let mut builder = StackBuilder::new(StackConfig::default())?;
    let dev = builder.device_register(loopback::device())?;
    let iface = builder.ip_iface_register(dev, IpIface::parse(LOOPBACK_ADDR, LOOPBACK_NETMASK)?)?;
    icmp::register(&mut builder)?;

    let src = iface.unicast;
    let dst = Ipv4Addr::LOCALHOST;
    let mut seq: u16 = 0;
    builder.timer_register(Duration::from_secs(1), move |stack: &Stack| {
        seq = seq.wrapping_add(1);
        let values = IcmpHeader::echo_values(PING_ID, seq);
        match icmp::output(stack, ICMP_TYPE_ECHO_REQUEST, 0, values, PAYLOAD, src, dst) {
            Ok(IpOutput::Sent(len)) => println!("ping {dst}: seq={seq}, {len} bytes"),
            Ok(IpOutput::Pending) => println!("ping {dst}: seq={seq} pending"),
            Err(e) => eprintln!("ping {dst}: {e}"),
        }
    })?;

    let running = builder.run()?;
    println!("Pinging {dst} for {seconds}s");
    thread::sleep(Duration::from_secs(seconds));
    running.shutdown();
    Ok(())
}

use std::io;
use std::process::Command;

fn ip(args: &[&str]) -> io::Result<()> {
    let status = Command::new("ip").args(args).status()?;
    if !status.success() {
        return Err(io::Error::other(format!("`ip {}` failed: {status}", args.join(" "))));
    }
    Ok(())
}

/// Give the host side of `iface_name` the address `ip_cidr` and bring it up.
pub fn configure_interface(iface_name: &str, ip_cidr: &str) -> io::Result<()> {
    ip(&["addr", "add", ip_cidr, "dev", iface_name])?;
    ip(&["link", "set", "up", "dev", iface_name])?;

    println!("Interface {iface_name} configured with IP {ip_cidr} and brought up");
    Ok(())
}

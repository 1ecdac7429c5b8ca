//! TUN driver backed by the kernel's tun device
//!
//! A TUN device carries bare IP datagrams, so there is no link-layer header
//! and no address resolution. Opening the device starts a receive thread
//! that feeds every datagram read from the kernel into the stack.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, warn};
use tun_tap::{Iface, Mode};

use crate::device::{Device, DeviceFlags, DeviceType, Driver, HwAddr};
use crate::protocol::{ether_type, RxHandle};

pub const TUN_MTU: usize = 1500;

/// How long the receive thread sleeps when the kernel has nothing for it.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

pub struct Tun {
    iface: Arc<Iface>,
    running: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Tun {
    /// Create (or attach to) the kernel tun device `name`.
    pub fn new(name: &str) -> io::Result<Self> {
        let iface = Iface::without_packet_info(name, Mode::Tun)?;
        iface.set_non_blocking()?;
        Ok(Tun {
            iface: Arc::new(iface),
            running: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
        })
    }

    /// Name the kernel gave the device.
    pub fn name(&self) -> &str {
        self.iface.name()
    }

    fn receive_loop(iface: Arc<Iface>, running: Arc<AtomicBool>, rx: RxHandle) {
        let mut buf = [0u8; TUN_MTU + 4];
        while running.load(Ordering::Acquire) {
            match iface.recv(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    if let Err(e) = rx.input(ether_type::IP, &buf[..n]) {
                        warn!("input failed, tun={}: {e}", iface.name());
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    error!("recv failed, tun={}: {e}", iface.name());
                    break;
                }
            }
        }
        debug!("receive loop stopped, tun={}", iface.name());
    }
}

impl Driver for Tun {
    fn open(&self, dev: &Device, rx: RxHandle) -> io::Result<()> {
        self.running.store(true, Ordering::Release);
        let iface = Arc::clone(&self.iface);
        let running = Arc::clone(&self.running);
        let reader = thread::Builder::new()
            .name(format!("{}-rx", dev.name()))
            .spawn(move || Tun::receive_loop(iface, running, rx))?;
        *self.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(reader);
        Ok(())
    }

    fn close(&self, _dev: &Device) -> io::Result<()> {
        self.running.store(false, Ordering::Release);
        let reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(reader) = reader {
            if reader.join().is_err() {
                return Err(io::Error::other("tun receive thread panicked"));
            }
        }
        Ok(())
    }

    fn transmit(&self, dev: &Device, ty: u16, data: &[u8], _dst: Option<&HwAddr>) -> io::Result<()> {
        if ty != ether_type::IP {
            debug!("dev={}, type=0x{:04x} not carried by tun, dropped", dev.name(), ty);
            return Ok(());
        }
        self.iface.send(data).map(|_| ())
    }
}

pub fn device(name: &str) -> io::Result<Device> {
    let tun = Tun::new(name)?;
    Ok(Device::new(DeviceType::Tun, TUN_MTU, DeviceFlags::P2P, Box::new(tun)))
}

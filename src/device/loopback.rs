//! Loopback driver: every transmitted frame is received again on the same
//! device.

use std::io;
use std::sync::{Mutex, PoisonError};

use log::debug;

use crate::device::{Device, DeviceFlags, DeviceType, Driver, HwAddr};
use crate::protocol::RxHandle;

pub const LOOPBACK_MTU: usize = u16::MAX as usize;

#[derive(Default)]
pub struct Loopback {
    rx: Mutex<Option<RxHandle>>,
}

impl Driver for Loopback {
    fn open(&self, _dev: &Device, rx: RxHandle) -> io::Result<()> {
        *self.rx.lock().unwrap_or_else(PoisonError::into_inner) = Some(rx);
        Ok(())
    }

    fn close(&self, _dev: &Device) -> io::Result<()> {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(())
    }

    fn transmit(&self, dev: &Device, ty: u16, data: &[u8], _dst: Option<&HwAddr>) -> io::Result<()> {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(rx) = rx.as_ref() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "loopback is closed"));
        };
        debug!("dev={}, type=0x{:04x}, len={}", dev.name(), ty, data.len());
        rx.input(ty, data).map_err(io::Error::other)
    }
}

pub fn device() -> Device {
    Device::new(
        DeviceType::Loopback,
        LOOPBACK_MTU,
        DeviceFlags::LOOPBACK,
        Box::new(Loopback::default()),
    )
}

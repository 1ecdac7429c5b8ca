//! Dummy driver: accepts and discards everything.

use std::io;

use log::debug;

use crate::device::{Device, DeviceFlags, DeviceType, Driver, HwAddr};

pub const DUMMY_MTU: usize = u16::MAX as usize;

pub struct Dummy;

impl Driver for Dummy {
    fn transmit(&self, dev: &Device, ty: u16, data: &[u8], _dst: Option<&HwAddr>) -> io::Result<()> {
        debug!("dev={}, type=0x{:04x}, len={}", dev.name(), ty, data.len());
        Ok(())
    }
}

pub fn device() -> Device {
    Device::new(DeviceType::Dummy, DUMMY_MTU, DeviceFlags::empty(), Box::new(Dummy))
}

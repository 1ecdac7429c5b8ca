//! Link-layer protocol dispatch
//!
//! Each registered protocol type owns a bounded FIFO of received frames.
//! Receiving a frame only copies it into the FIFO and raises a softirq; the
//! protocol handler runs later, on the consumer thread, when the queues are
//! drained.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use log::{debug, error, info, trace, warn};

use crate::device::{Device, DeviceId};
use crate::error::{NetError, Result};
use crate::intr::{Irq, IrqSender};
use crate::stack::Stack;

/// Link-layer (ethernet) protocol types
pub mod ether_type {
    pub const IP: u16 = 0x0800;
    pub const ARP: u16 = 0x0806;
    pub const IPV6: u16 = 0x86dd;
}

pub type ProtocolHandler = Box<dyn Fn(&Stack, &[u8], &Device) + Send + Sync>;

/// A received frame waiting for its protocol handler.
#[derive(Debug)]
pub struct QueueEntry {
    pub dev: DeviceId,
    pub data: Vec<u8>,
}

struct NetProtocol {
    ty: u16,
    queue: ArrayQueue<QueueEntry>,
    handler: ProtocolHandler,
}

pub struct ProtocolTable {
    protocols: Vec<NetProtocol>,
    queue_capacity: usize,
}

impl ProtocolTable {
    pub fn new(queue_capacity: usize) -> Self {
        ProtocolTable {
            protocols: Vec::new(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn register(&mut self, ty: u16, handler: ProtocolHandler) -> Result<()> {
        if self.protocols.iter().any(|proto| proto.ty == ty) {
            error!("already registered, type=0x{ty:04x}");
            return Err(NetError::DuplicateProtocol(ty));
        }
        self.protocols.try_reserve(1)?;
        self.protocols.push(NetProtocol {
            ty,
            queue: ArrayQueue::new(self.queue_capacity),
            handler,
        });
        info!("registered, type=0x{ty:04x}");
        Ok(())
    }

    pub fn is_registered(&self, ty: u16) -> bool {
        self.protocols.iter().any(|proto| proto.ty == ty)
    }

    /// Number of frames waiting for protocol `ty`.
    pub fn pending(&self, ty: u16) -> usize {
        self.protocols
            .iter()
            .find(|proto| proto.ty == ty)
            .map_or(0, |proto| proto.queue.len())
    }

    /// Queue a copy of `data` for protocol `ty` and raise a softirq.
    ///
    /// Frames of unregistered types are dropped without error.
    pub(crate) fn input(&self, ty: u16, data: &[u8], dev: DeviceId, dev_name: &str, irq: &IrqSender) -> Result<()> {
        let Some(proto) = self.protocols.iter().find(|proto| proto.ty == ty) else {
            trace!("unsupported protocol, dev={dev_name}, type=0x{ty:04x}");
            return Ok(());
        };

        let mut copy = Vec::new();
        copy.try_reserve_exact(data.len()).map_err(|e| {
            error!("allocation failed, dev={dev_name}, len={}", data.len());
            NetError::NoMemory(e)
        })?;
        copy.extend_from_slice(data);

        if proto.queue.push(QueueEntry { dev, data: copy }).is_err() {
            error!("queue push failed, dev={dev_name}, type=0x{ty:04x}");
            return Err(NetError::QueueFull(ty));
        }
        debug!(
            "queue pushed (num:{}), dev={dev_name}, type=0x{ty:04x}, len={}",
            proto.queue.len(),
            data.len()
        );
        irq.raise(Irq::Softirq);
        Ok(())
    }

    /// Empty every protocol's queue in FIFO order, invoking its handler.
    pub(crate) fn drain(&self, stack: &Stack) {
        for proto in &self.protocols {
            while let Some(entry) = proto.queue.pop() {
                let Some(dev) = stack.device(entry.dev) else {
                    warn!("entry from unknown device index {}, dropped", entry.dev);
                    continue;
                };
                debug!(
                    "queue popped (num:{}), dev={}, type=0x{:04x}, len={}",
                    proto.queue.len(),
                    dev.name(),
                    proto.ty,
                    entry.data.len()
                );
                (proto.handler)(stack, &entry.data, dev);
            }
        }
    }

    /// Free every queued entry without dispatching it.
    pub(crate) fn discard_pending(&self) -> usize {
        let mut discarded = 0;
        for proto in &self.protocols {
            while proto.queue.pop().is_some() {
                discarded += 1;
            }
        }
        discarded
    }
}

/// What a driver uses to deliver received frames into the stack.
#[derive(Clone)]
pub struct RxHandle {
    dev: DeviceId,
    dev_name: String,
    protocols: Arc<ProtocolTable>,
    irq: IrqSender,
}

impl RxHandle {
    pub(crate) fn new(dev: &Device, protocols: Arc<ProtocolTable>, irq: IrqSender) -> Self {
        RxHandle {
            dev: dev.index(),
            dev_name: dev.name().to_string(),
            protocols,
            irq,
        }
    }

    pub fn dev(&self) -> DeviceId {
        self.dev
    }

    /// Hand a received frame of link-layer type `ty` to the stack.
    pub fn input(&self, ty: u16, data: &[u8]) -> Result<()> {
        self.protocols.input(ty, data, self.dev, &self.dev_name, &self.irq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::dummy;
    use crate::intr;
    use crate::stack::StackBuilder;
    use crate::StackConfig;
    use std::sync::mpsc;
    use std::time::Duration;

    const TEST_TYPE: u16 = 0x88b5;

    fn noop() -> ProtocolHandler {
        Box::new(|_: &Stack, _: &[u8], _: &Device| {})
    }

    #[test]
    fn test_duplicate_type_rejected() {
        let mut table = ProtocolTable::new(4);
        table.register(TEST_TYPE, noop()).unwrap();
        assert!(matches!(
            table.register(TEST_TYPE, noop()),
            Err(NetError::DuplicateProtocol(TEST_TYPE))
        ));
        assert!(table.is_registered(TEST_TYPE));
    }

    #[test]
    fn test_input_queues_and_raises_softirq() {
        let mut table = ProtocolTable::new(4);
        table.register(TEST_TYPE, noop()).unwrap();
        let (irq, irqs) = intr::channel();

        table.input(TEST_TYPE, b"frame", 0, "net0", &irq).unwrap();
        assert_eq!(table.pending(TEST_TYPE), 1);
        assert_eq!(irqs.try_recv(), Ok(Irq::Softirq));
    }

    #[test]
    fn test_unsupported_type_dropped_silently() {
        let table = ProtocolTable::new(4);
        let (irq, irqs) = intr::channel();
        table.input(TEST_TYPE, b"frame", 0, "net0", &irq).unwrap();
        assert_eq!(table.pending(TEST_TYPE), 0);
        assert!(irqs.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_reports_failure() {
        let mut table = ProtocolTable::new(1);
        table.register(TEST_TYPE, noop()).unwrap();
        let (irq, _irqs) = intr::channel();
        table.input(TEST_TYPE, b"first", 0, "net0", &irq).unwrap();
        assert!(matches!(
            table.input(TEST_TYPE, b"second", 0, "net0", &irq),
            Err(NetError::QueueFull(TEST_TYPE))
        ));
        assert_eq!(table.pending(TEST_TYPE), 1);
        assert_eq!(table.discard_pending(), 1);
        assert_eq!(table.pending(TEST_TYPE), 0);
    }

    #[test]
    fn test_drain_preserves_fifo_order() {
        let (tx, rx) = mpsc::channel();
        let mut builder = StackBuilder::new(StackConfig::default()).unwrap();
        let dev = builder.device_register(dummy::device()).unwrap();
        builder
            .protocol_register(TEST_TYPE, move |_: &Stack, data: &[u8], dev: &Device| {
                tx.send((data.to_vec(), dev.index())).unwrap();
            })
            .unwrap();
        let running = builder.run().unwrap();

        let rx_handle = running.rx_handle(dev).unwrap();
        rx_handle.input(TEST_TYPE, b"A").unwrap();
        rx_handle.input(TEST_TYPE, b"B").unwrap();

        let timeout = Duration::from_secs(2);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), (b"A".to_vec(), dev));
        assert_eq!(rx.recv_timeout(timeout).unwrap(), (b"B".to_vec(), dev));
        running.shutdown();
    }
}

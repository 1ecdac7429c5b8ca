//! Interrupt simulation
//!
//! Producers (driver receive threads, upper layers raising events) signal a
//! single consumer thread through a channel of tagged wake reasons. The
//! consumer serializes everything that runs in "softirq" context: protocol
//! queue draining, event broadcast and timer ticks. A receive timeout on
//! the channel doubles as the periodic timer interrupt.

use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::stack::Stack;
use crate::timer::{EventList, TimerList};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Irq {
    /// Frames are waiting in a protocol queue.
    Softirq,
    /// Broadcast to every event subscriber.
    Event,
    Shutdown,
}

/// Cloneable, non-blocking way to raise an interrupt.
#[derive(Debug, Clone)]
pub struct IrqSender {
    tx: Sender<Irq>,
}

impl IrqSender {
    pub(crate) fn raise(&self, irq: Irq) {
        if self.tx.send(irq).is_err() {
            debug!("irq {irq:?} raised with no consumer running");
        }
    }
}

pub(crate) fn channel() -> (IrqSender, Receiver<Irq>) {
    let (tx, rx) = mpsc::channel();
    (IrqSender { tx }, rx)
}

/// State owned by the consumer thread.
pub(crate) struct SoftirqContext {
    stack: Arc<Stack>,
    irqs: Receiver<Irq>,
    timers: TimerList<Stack>,
    events: EventList<Stack>,
    tick: Duration,
}

impl SoftirqContext {
    pub(crate) fn new(
        stack: Arc<Stack>,
        irqs: Receiver<Irq>,
        timers: TimerList<Stack>,
        events: EventList<Stack>,
    ) -> Self {
        let tick = stack.config().tick_interval;
        SoftirqContext {
            stack,
            irqs,
            timers,
            events,
            tick,
        }
    }

    pub(crate) fn spawn(self, name: &str) -> io::Result<JoinHandle<()>> {
        thread::Builder::new().name(name.to_string()).spawn(move || self.run())
    }

    fn run(mut self) {
        debug!("softirq context started");
        let mut next_tick = Instant::now() + self.tick;
        loop {
            let timeout = next_tick.saturating_duration_since(Instant::now());
            match self.irqs.recv_timeout(timeout) {
                Ok(Irq::Softirq) => {
                    trace!("softirq");
                    self.stack.protocols().drain(&self.stack);
                }
                Ok(Irq::Event) => {
                    trace!("event");
                    self.events.drain(&self.stack);
                }
                Ok(Irq::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            let now = Instant::now();
            if now >= next_tick {
                self.timers.tick(&self.stack, now);
                next_tick = now + self.tick;
            }
        }
        debug!("softirq context stopped");
    }
}

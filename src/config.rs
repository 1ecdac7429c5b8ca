//! Runtime knobs for the stack
//!
//! There is no configuration file: addressing is supplied programmatically,
//! and the values here only shape the interrupt-simulation context.

use std::time::Duration;

/// Default period of the timer tick raised on the consumer thread.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Default number of pending frames each link-layer protocol can hold.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct StackConfig {
    /// How often registered timers are checked.
    pub tick_interval: Duration,
    /// Capacity of every per-protocol inbound FIFO.
    pub queue_capacity: usize,
    /// Name given to the softirq consumer thread.
    pub thread_name: String,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            tick_interval: DEFAULT_TICK_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            thread_name: String::from("net-softirq"),
        }
    }
}

impl StackConfig {
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        // ArrayQueue rejects a zero capacity
        self.queue_capacity = capacity.max(1);
        self
    }
}

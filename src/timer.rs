//! Periodic timers and broadcast events
//!
//! Both lists are owned by the softirq consumer once the stack runs, so
//! handlers never overlap with frame dispatch or with each other.

use std::time::{Duration, Instant};

use log::{debug, info};

use crate::error::Result;

pub type TimerHandler<C> = Box<dyn FnMut(&C) + Send>;
pub type EventHandler<C> = Box<dyn FnMut(&C) + Send>;

struct Timer<C> {
    interval: Duration,
    last: Instant,
    handler: TimerHandler<C>,
}

/// Timers fire once `interval` has elapsed since they last fired, then
/// restart from the moment they fired. Missed intervals are not caught up.
pub struct TimerList<C> {
    timers: Vec<Timer<C>>,
}

impl<C> Default for TimerList<C> {
    fn default() -> Self {
        TimerList { timers: Vec::new() }
    }
}

impl<C> TimerList<C> {
    pub fn register(&mut self, interval: Duration, handler: TimerHandler<C>) -> Result<()> {
        self.register_at(interval, handler, Instant::now())
    }

    pub(crate) fn register_at(&mut self, interval: Duration, handler: TimerHandler<C>, now: Instant) -> Result<()> {
        self.timers.try_reserve(1)?;
        self.timers.push(Timer {
            interval,
            last: now,
            handler,
        });
        info!("registered: interval={interval:?}");
        Ok(())
    }

    pub fn tick(&mut self, ctx: &C, now: Instant) {
        for timer in &mut self.timers {
            if now.saturating_duration_since(timer.last) >= timer.interval {
                (timer.handler)(ctx);
                timer.last = now;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

/// Subscribers are called in registration order on every raised event.
pub struct EventList<C> {
    subscribers: Vec<EventHandler<C>>,
}

impl<C> Default for EventList<C> {
    fn default() -> Self {
        EventList {
            subscribers: Vec::new(),
        }
    }
}

impl<C> EventList<C> {
    pub fn subscribe(&mut self, handler: EventHandler<C>) -> Result<()> {
        self.subscribers.try_reserve(1)?;
        self.subscribers.push(handler);
        info!("subscribed, num={}", self.subscribers.len());
        Ok(())
    }

    pub fn drain(&mut self, ctx: &C) {
        debug!("broadcast to {} subscribers", self.subscribers.len());
        for handler in &mut self.subscribers {
            handler(ctx);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

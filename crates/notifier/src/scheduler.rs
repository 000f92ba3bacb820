//! Per-channel send scheduler.
//!
//! Hands out target send times spaced at least `delay` apart. After an idle
//! period the sequence resynchronizes to the current time instead of
//! catching up on overdue slots.

use std::time::Duration;

use tokio::time::Instant;

/// Rate limiter for one channel. Owned and called by a single worker task.
#[derive(Debug)]
pub struct Scheduler {
    delay: Duration,
    last: Instant,
}

impl Scheduler {
    pub fn new(delay: Duration) -> Self {
        Self::starting_at(delay, Instant::now())
    }

    /// Create a scheduler whose last issued slot is `start`.
    pub fn starting_at(delay: Duration, start: Instant) -> Self {
        Self { delay, last: start }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Next target send time relative to the current instant.
    pub fn next(&mut self) -> Instant {
        self.next_at(Instant::now())
    }

    /// Next target send time relative to `now`.
    pub fn next_at(&mut self, now: Instant) -> Instant {
        self.last = if self.last <= now {
            now + self.delay
        } else {
            self.last + self.delay
        };
        self.last
    }
}

//! Host time adapter.
//!
//! Implements [`Clock`] over `std::time::Instant`, measured from the
//! moment the adapter was created.

use std::time::{Duration, Instant};

use crate::app::ports::Clock;

/// Monotonic wall clock for real runs.
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Seconds since the adapter was created.
    pub fn uptime_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&self, period: Duration) {
        std::thread::sleep(period);
    }
}

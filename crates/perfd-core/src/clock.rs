//! Monotonic time sources.
//!
//! Every timestamp in the pipeline is an `i64` count of nanoseconds from an
//! arbitrary fixed origin. Only differences and ordering are meaningful.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Source of monotonic nanosecond timestamps.
pub trait Clock: Send + Sync {
    /// Returns the current time in nanoseconds.
    fn get_current_time(&self) -> i64;
}

/// Production clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SteadyClock {
    origin: Instant,
}

impl SteadyClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SteadyClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SteadyClock {
    fn get_current_time(&self) -> i64 {
        // i64 nanoseconds cover ~292 years of uptime.
        i64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct FakeClock {
    now: AtomicI64,
}

impl FakeClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set_current_time(&self, time: i64) {
        self.now.store(time, Ordering::SeqCst);
    }

    /// Moves the clock forward by `delta` nanoseconds.
    pub fn elapse(&self, delta: i64) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn get_current_time(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

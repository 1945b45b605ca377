//! Wall-clock sources.
//!
//! Synchronization anchors every track to wall-clock "now" and compares
//! sender reports against wall-clock elapsed time, so the source of "now" is
//! injectable. [`SystemClock`] is used in production; [`ManualClock`] lets
//! tests and simulations step time deterministically.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A source of wall-clock time in nanoseconds since the Unix epoch.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_unix_nanos(&self) -> i64;
}

/// The operating system's real-time clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_nanos(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_nanos() as i64,
            Err(e) => -(e.duration().as_nanos() as i64),
        }
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicI64,
}

impl ManualClock {
    pub fn new(start_unix_nanos: i64) -> Self {
        Self {
            nanos: AtomicI64::new(start_unix_nanos),
        }
    }

    pub fn set(&self, unix_nanos: i64) {
        self.nanos.store(unix_nanos, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix_nanos(&self) -> i64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        clock.advance(Duration::from_micros(5));
        assert_eq!(clock.now_unix_nanos(), 6_000);
        clock.set(42);
        assert_eq!(clock.now_unix_nanos(), 42);
    }

    #[test]
    fn system_clock_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_unix_nanos() > 1_577_836_800_000_000_000);
    }
}

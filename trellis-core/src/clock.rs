//! Time Sources
//!
//! The engine stamps values it produces itself (state nodes, bare local
//! writes, custom aggregations) with the current time. The clock is
//! injected so those stamps are reproducible under test.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::triplet::Timestamp;

/// A source of timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Timestamp::from_secs(secs)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    // f64 bits
    secs: AtomicU64,
}

impl ManualClock {
    pub fn new(secs: f64) -> Self {
        Self {
            secs: AtomicU64::new(secs.to_bits()),
        }
    }

    pub fn set(&self, secs: f64) {
        self.secs.store(secs.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, delta: f64) {
        let current = f64::from_bits(self.secs.load(Ordering::SeqCst));
        self.set(current + delta);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_secs(f64::from_bits(self.secs.load(Ordering::SeqCst)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_on_demand() {
        let clock = ManualClock::new(1.0);
        assert_eq!(clock.now(), Timestamp::from_secs(1.0));
        clock.advance(0.5);
        assert_eq!(clock.now(), Timestamp::from_secs(1.5));
        clock.set(10.0);
        assert_eq!(clock.now(), Timestamp::from_secs(10.0));
    }

    #[test]
    fn system_clock_is_after_epoch() {
        assert!(SystemClock.now().as_secs() > 0.0);
    }
}

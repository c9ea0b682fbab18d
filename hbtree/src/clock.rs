//! Time sources for heartbeat trees.
//!
//! Every node in a tree reads "now" from the single [`Clock`] held by the
//! tree's shared state, always under the shared lock. Timestamps are signed
//! nanoseconds so latencies can be computed by plain subtraction.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of nanosecond timestamps.
pub trait Clock: Send + Sync {
    /// Returns the current time in nanoseconds.
    fn now_ns(&self) -> i64;
}

/// Wall-clock time in nanoseconds since the Unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[allow(clippy::cast_possible_truncation)] // Epoch nanos fit in i64 until year 2262
    fn now_ns(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_nanos() as i64,
            Err(before_epoch) => -(before_epoch.duration().as_nanos() as i64),
        }
    }
}

/// A clock that only moves when told to.
///
/// Useful for deterministic tests and for replaying recorded timelines.
/// Share it with the tree through an `Arc` and drive it from the caller.
///
/// ```rust
/// use std::sync::Arc;
/// use hbtree::clock::{Clock, ManualClock};
///
/// let clock = Arc::new(ManualClock::new(0));
/// clock.advance(100);
/// assert_eq!(clock.now_ns(), 100);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Creates a clock reading `start_ns`.
    pub fn new(start_ns: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ns),
        }
    }

    /// Sets the current time.
    pub fn set(&self, now_ns: i64) {
        self.now.store(now_ns, Ordering::SeqCst);
    }

    /// Moves the clock forward by `delta_ns` and returns the new time.
    pub fn advance(&self, delta_ns: i64) -> i64 {
        self.now.fetch_add(delta_ns, Ordering::SeqCst) + delta_ns
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_after_2020() {
        let now = SystemClock.now_ns();
        assert!(now > 1_577_836_800_000_000_000);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(5);
        assert_eq!(clock.now_ns(), 5);

        assert_eq!(clock.advance(10), 15);
        assert_eq!(clock.now_ns(), 15);

        clock.set(1_000);
        assert_eq!(clock.now_ns(), 1_000);
    }
}

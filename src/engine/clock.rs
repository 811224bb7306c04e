//! Engine Clock
//!
//! Single source of timestamps for every time-gated decision in the engine.
//! State-machine code never reads system time directly - it asks the clock,
//! so the same round can be replayed under a manual clock in tests.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Seconds since Unix epoch (1970-01-01 00:00:00 UTC).
pub type UnixSeconds = i64;

/// Seconds per minute.
pub const SECS_PER_MIN: i64 = 60;
/// Seconds per hour.
pub const SECS_PER_HOUR: i64 = 60 * SECS_PER_MIN;
/// Seconds per day.
pub const SECS_PER_DAY: i64 = 24 * SECS_PER_HOUR;

/// Timestamp source for the engine.
///
/// # Determinism Contract
/// - `now()` is the only way engine code observes wall-clock time
/// - A `ManualClock` makes every time-gated transition replayable
pub trait Clock: Send + Sync {
    fn now(&self) -> UnixSeconds;
}

/// Wall-clock time via chrono. The serving default.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UnixSeconds {
        chrono::Utc::now().timestamp()
    }
}

/// Manually advanced clock for tests and replay.
///
/// Moves only forward; `advance_to` panics on backward movement so a test
/// that accidentally rewinds time fails loudly instead of producing a
/// window decision that could never occur live.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<UnixSeconds>>,
}

impl ManualClock {
    pub fn new(start: UnixSeconds) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance to a new time. Panics if time would go backward.
    pub fn advance_to(&self, new_time: UnixSeconds) {
        let mut current = self.current.lock();
        assert!(
            new_time >= *current,
            "ManualClock: cannot go backward from {} to {}",
            *current,
            new_time
        );
        *current = new_time;
    }

    /// Advance by a delta. Panics if delta is negative.
    pub fn advance_by(&self, delta: i64) {
        assert!(delta >= 0, "ManualClock: delta must be non-negative");
        let mut current = self.current.lock();
        *current += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UnixSeconds {
        *self.current.lock()
    }
}

impl fmt::Display for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_monotonic() {
        let clock = ManualClock::new(1_700_000_000);
        assert_eq!(clock.now(), 1_700_000_000);

        clock.advance_to(1_700_000_100);
        assert_eq!(clock.now(), 1_700_000_100);

        clock.advance_by(50);
        assert_eq!(clock.now(), 1_700_000_150);
    }

    #[test]
    #[should_panic(expected = "cannot go backward")]
    fn test_manual_clock_backward_panics() {
        let clock = ManualClock::new(1_700_000_000);
        clock.advance_to(1_600_000_000);
    }

    #[test]
    fn test_system_clock_is_sane() {
        // 2023-01-01 as a floor; catches a clock returning 0 or millis.
        let now = SystemClock.now();
        assert!(now > 1_672_531_200);
        assert!(now < 100_000_000_000);
    }
}

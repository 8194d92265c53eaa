//! Injectable time sources.
//!
//! Every time-dependent component (breakers, caches, the rate limiter, and the
//! orchestrator's timestamps) reads time through [`Clock`], so tests can drive them with
//! [`ManualClock`] instead of sleeping.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use time::OffsetDateTime;

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync {
    /// Monotonic instant used for elapsed-time arithmetic.
    fn now(&self) -> Instant;

    /// Current UTC wall-clock time used for timestamps and calendar buckets.
    fn utc(&self) -> OffsetDateTime;
}

/// Shared, dynamically dispatched clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    origin_utc: OffsetDateTime,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Start a manual clock at the given wall-clock time.
    pub fn starting_at(origin_utc: OffsetDateTime) -> Self {
        Self {
            origin: Instant::now(),
            origin_utc,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move both the monotonic and wall-clock readings forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|poison| poison.into_inner());
        *offset += by;
    }

    fn offset(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_at(OffsetDateTime::UNIX_EPOCH)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset()
    }

    fn utc(&self) -> OffsetDateTime {
        self.origin_utc + self.offset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_both_readings() {
        let clock = ManualClock::default();
        let before = clock.now();
        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.now() - before, Duration::from_secs(90));
        assert_eq!(clock.utc().unix_timestamp(), 90);
    }
}

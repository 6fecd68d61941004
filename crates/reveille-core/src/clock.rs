//! # Monotonic Clock
//!
//! Issues strictly increasing microsecond timestamps for `created_at`.
//!
//! Wall clocks can stand still (coarse resolution) or go backwards (NTP
//! adjustments). The queue order must never do either, so every issued
//! value is `max(wall_clock, last_issued + 1µs)`.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Converts microseconds since the epoch into a UTC timestamp.
pub fn from_micros(micros: i64) -> DateTime<Utc> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos).unwrap_or_default()
}

/// Thread-safe source of strictly increasing timestamps.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_micros: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next timestamp, read from the system clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.tick(Utc::now())
    }

    /// Returns the next timestamp given a wall-clock reading.
    pub fn tick(&self, wall: DateTime<Utc>) -> DateTime<Utc> {
        let wall_micros = wall.timestamp_micros();
        let mut issued = wall_micros;
        // fetch_update retries on contention, so `issued` always holds the stored value
        let _ = self
            .last_micros
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                issued = wall_micros.max(last + 1);
                Some(issued)
            });
        from_micros(issued)
    }

    /// Makes sure future timestamps are later than `seen`.
    ///
    /// Called with the largest persisted `created_at` after a restart.
    pub fn observe(&self, seen: DateTime<Utc>) {
        self.last_micros
            .fetch_max(seen.timestamp_micros(), Ordering::SeqCst);
    }
}

//! Clock abstractions used for window math.
//!
//! Scores written to the store are wall-clock instants so that every replica
//! sharing a store agrees on what "inside the window" means. Within a single
//! process the [`SystemClock`] never goes backwards.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

/// Clock abstraction so timing can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock anchored once, then advanced by a monotonic `Instant`.
///
/// Notes: replicas still depend on synchronized host clocks for their anchors;
/// this only guarantees monotonic readings within one process.
#[derive(Debug, Clone)]
pub struct SystemClock {
    anchor_wall: DateTime<Utc>,
    anchor: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            anchor_wall: Utc::now(),
            anchor: Instant::now(),
        }
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.anchor.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.anchor_wall + elapsed
    }
}

/// Manually driven clock. Clones share the same reading.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Create a clock frozen at the given Unix timestamp (seconds).
    ///
    /// # Panics
    ///
    /// Panics if `secs` is outside the range `DateTime<Utc>` can represent.
    pub fn at_epoch_secs(secs: i64) -> Self {
        match Utc.timestamp_opt(secs, 0).single() {
            Some(start) => Self::new(start),
            None => panic!("epoch seconds {} out of range for ManualClock", secs),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        let mut now = self.now.lock();
        *now += delta;
    }

    /// Jump to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Score representation of an instant: microseconds since the Unix epoch.
///
/// Redis stores scores as IEEE-754 doubles, which hold integers exactly up to
/// 2^53. Epoch microseconds stay well inside that range; epoch nanoseconds do not.
pub fn score_of(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_micros()
}

/// Convert a window length to the score unit, truncating below one microsecond.
pub fn score_span(window: Duration) -> i64 {
    i64::try_from(window.as_micros()).unwrap_or(i64::MAX)
}

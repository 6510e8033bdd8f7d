//! Limit specifications and time units.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RatelogError, Result};

/// Named time unit for configured limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Per-second rate limiting
    Second,
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
    /// Per-day rate limiting
    Day,
}

impl TimeUnit {
    /// Get the duration of this time unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

/// Shortest window the store can tell apart from zero: one score unit.
pub const MIN_WINDOW: Duration = Duration::from_micros(1);

/// Longest accepted window, about a century.
pub const MAX_WINDOW: Duration = Duration::from_secs(100 * 365 * 86_400);

/// A limit/window pair for one decision.
///
/// Always holds `limit > 0` and `MIN_WINDOW <= window <= MAX_WINDOW`;
/// construction rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LimitSpec {
    limit: u64,
    window: Duration,
}

impl LimitSpec {
    /// Create a spec allowing `limit` requests per trailing `window`.
    pub fn new(limit: u64, window: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(RatelogError::InvalidSpec(
                "limit must be greater than 0".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(RatelogError::InvalidSpec(
                "window must be greater than 0".to_string(),
            ));
        }
        if window < MIN_WINDOW {
            return Err(RatelogError::InvalidSpec(format!(
                "window must be at least {:?}",
                MIN_WINDOW
            )));
        }
        if window > MAX_WINDOW {
            return Err(RatelogError::InvalidSpec(format!(
                "window must be at most {:?}",
                MAX_WINDOW
            )));
        }
        Ok(Self { limit, window })
    }

    /// `limit` requests per one `unit`.
    pub fn per(limit: u64, unit: TimeUnit) -> Result<Self> {
        Self::new(limit, unit.duration())
    }

    /// Maximum requests admitted in the window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Length of the trailing window.
    pub fn window(&self) -> Duration {
        self.window
    }
}

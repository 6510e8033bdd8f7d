//! The outcome of a single rate limit check.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::limit::LimitSpec;

/// Result of a sliding window check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// `max(0, limit - count)`.
    pub remaining: u64,
    /// `checked_at + window`. An upper bound on when the oldest entry leaves the window.
    pub reset_time: DateTime<Utc>,
    /// `window` when denied, zero when allowed.
    pub retry_after: Duration,
    /// Entries observed in the window, including this request's own.
    pub count: u64,
    /// The instant the request was logged at.
    pub checked_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Derive a decision from the observed log size.
    pub fn from_count(count: u64, spec: &LimitSpec, checked_at: DateTime<Utc>) -> Self {
        let window = spec.window();
        let allowed = count <= spec.limit();

        Self {
            allowed,
            remaining: spec.limit().saturating_sub(count),
            reset_time: checked_at
                .checked_add_signed(window_delta(spec))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            retry_after: if allowed { Duration::ZERO } else { window },
            count,
            checked_at,
        }
    }

    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Start of the trailing window this decision was computed over.
    pub fn window_start(&self, spec: &LimitSpec) -> DateTime<Utc> {
        self.checked_at
            .checked_sub_signed(window_delta(spec))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

fn window_delta(spec: &LimitSpec) -> chrono::Duration {
    chrono::Duration::from_std(spec.window()).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_count_at_limit_is_allowed() {
        let spec = LimitSpec::new(3, Duration::from_secs(60)).unwrap();
        let decision = RateLimitDecision::from_count(3, &spec, at(100));

        assert!(decision.is_allowed());
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after, Duration::ZERO);
        assert_eq!(decision.reset_time, at(160));
    }

    #[test]
    fn test_count_over_limit_is_denied() {
        let spec = LimitSpec::new(3, Duration::from_secs(60)).unwrap();
        let decision = RateLimitDecision::from_count(7, &spec, at(100));

        assert!(!decision.is_allowed());
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after, Duration::from_secs(60));
        assert_eq!(decision.window_start(&spec), at(40));
    }

    #[test]
    fn test_longest_window_near_calendar_end_saturates() {
        let spec = LimitSpec::new(1, crate::ratelimit::MAX_WINDOW).unwrap();
        let near_end = DateTime::<Utc>::MAX_UTC - chrono::Duration::days(1);
        let decision = RateLimitDecision::from_count(1, &spec, near_end);

        assert_eq!(decision.reset_time, DateTime::<Utc>::MAX_UTC);
        assert!(decision.window_start(&spec) < near_end);
    }
}

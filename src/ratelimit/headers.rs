//! Translating decisions into client-facing response metadata.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{LimitSpec, RateLimitDecision};

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Response headers derived from one decision.
///
/// `retry_after` is only present on denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitHeaders {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Reset time in whole epoch seconds.
    pub reset: i64,
    /// Seconds to wait, rounded up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl RateLimitHeaders {
    pub fn from_decision(decision: &RateLimitDecision, spec: &LimitSpec) -> Self {
        let retry_after = if decision.allowed {
            None
        } else {
            let retry = decision.retry_after;
            let secs = retry.as_secs() + u64::from(retry.subsec_nanos() > 0);
            Some(secs)
        };

        Self {
            allowed: decision.allowed,
            limit: spec.limit(),
            remaining: decision.remaining,
            reset: decision.reset_time.timestamp(),
            retry_after,
        }
    }

    /// Header name/value pairs in emission order.
    pub fn header_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset.to_string()),
        ];
        if let Some(retry_after) = self.retry_after {
            pairs.push((HEADER_RETRY_AFTER, retry_after.to_string()));
        }
        pairs
    }
}

/// JSON body describing a decision, for status endpoints and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub success: bool,
    pub message: String,
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_time: DateTime<Utc>,
    /// Seconds, zero when allowed.
    pub retry_after: u64,
    pub window_start: DateTime<Utc>,
}

impl RateLimitStatus {
    pub fn from_decision(decision: &RateLimitDecision, spec: &LimitSpec) -> Self {
        let headers = RateLimitHeaders::from_decision(decision, spec);
        let message = if decision.allowed {
            "Request allowed"
        } else {
            "Rate limit exceeded"
        };

        Self {
            success: true,
            message: message.to_string(),
            allowed: decision.allowed,
            limit: spec.limit(),
            remaining: decision.remaining,
            reset_time: decision.reset_time,
            retry_after: headers.retry_after.unwrap_or(0),
            window_start: decision.window_start(spec),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_allowed_headers_omit_retry_after() {
        let spec = LimitSpec::new(10, Duration::from_secs(60)).unwrap();
        let decision = RateLimitDecision::from_count(4, &spec, at(1_000));
        let headers = RateLimitHeaders::from_decision(&decision, &spec);

        assert_eq!(headers.remaining, 6);
        assert_eq!(headers.reset, 1_060);
        assert_eq!(headers.retry_after, None);
        assert_eq!(
            headers.header_pairs(),
            vec![
                (HEADER_LIMIT, "10".to_string()),
                (HEADER_REMAINING, "6".to_string()),
                (HEADER_RESET, "1060".to_string()),
            ]
        );
    }

    #[test]
    fn test_denied_headers_include_retry_after() {
        let spec = LimitSpec::new(3, Duration::from_secs(60)).unwrap();
        let decision = RateLimitDecision::from_count(4, &spec, at(1_000));
        let headers = RateLimitHeaders::from_decision(&decision, &spec);

        assert!(!headers.allowed);
        assert_eq!(headers.remaining, 0);
        assert_eq!(headers.retry_after, Some(60));
        assert_eq!(headers.header_pairs().len(), 4);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let spec = LimitSpec::new(1, Duration::from_millis(1_500)).unwrap();
        let decision = RateLimitDecision::from_count(2, &spec, at(1_000));
        let headers = RateLimitHeaders::from_decision(&decision, &spec);

        assert_eq!(headers.retry_after, Some(2));
    }

    #[test]
    fn test_status_json() {
        let spec = LimitSpec::new(3, Duration::from_secs(60)).unwrap();
        let decision = RateLimitDecision::from_count(4, &spec, at(1_000));
        let status = RateLimitStatus::from_decision(&decision, &spec);

        assert_eq!(status.message, "Rate limit exceeded");
        assert_eq!(status.retry_after, 60);
        assert_eq!(status.window_start, at(940));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["allowed"], false);
        assert_eq!(json["limit"], 3);
    }
}

//! Rate limiting logic: the sliding window engine and its callers.

mod backend;
mod decision;
mod guard;
mod headers;
mod key;
mod limit;
mod limiter;
mod rules;

pub use backend::RateLimiterBackend;
pub use decision::RateLimitDecision;
pub use guard::{BypassReason, FailurePolicy, GuardConfig, GuardOutcome, RateLimitGuard};
pub use headers::{
    RateLimitHeaders, RateLimitStatus, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET,
    HEADER_RETRY_AFTER,
};
pub use key::RateLimitKey;
pub use limit::{LimitSpec, TimeUnit, MAX_WINDOW, MIN_WINDOW};
pub use limiter::{DenyPolicy, SlidingWindowLimiter, DEFAULT_STORE_TIMEOUT, EXPIRY_MARGIN};
pub use rules::{KeyRule, LimitRules, RateLimitRule};

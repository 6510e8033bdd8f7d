//! Rate limiter trait for abstracting decision engines.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{LimitSpec, RateLimitDecision, RateLimitKey};
use crate::error::Result;

/// Trait for rate limiter implementations.
///
/// Callers such as [`super::RateLimitGuard`] only depend on this trait, so the
/// store-backed [`super::SlidingWindowLimiter`] can be swapped for a stub.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Record a request for `key` and decide whether it is within `spec`.
    async fn check(&self, key: &RateLimitKey, spec: &LimitSpec) -> Result<RateLimitDecision>;

    /// Same as [`RateLimiterBackend::check`], bounded by `timeout` instead of the default deadline.
    async fn check_within(
        &self,
        key: &RateLimitKey,
        spec: &LimitSpec,
        timeout: Duration,
    ) -> Result<RateLimitDecision>;
}

#[async_trait]
impl<B: RateLimiterBackend + ?Sized> RateLimiterBackend for Arc<B> {
    async fn check(&self, key: &RateLimitKey, spec: &LimitSpec) -> Result<RateLimitDecision> {
        (**self).check(key, spec).await
    }

    async fn check_within(
        &self,
        key: &RateLimitKey,
        spec: &LimitSpec,
        timeout: Duration,
    ) -> Result<RateLimitDecision> {
        (**self).check_within(key, spec, timeout).await
    }
}

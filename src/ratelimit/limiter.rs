//! Sliding window log rate limiter.
//!
//! Every check appends the request instant to a per-key sorted log in the
//! store, evicts what fell out of the trailing window, and counts what is
//! left. All of it goes to the store as one batch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::{LimitSpec, RateLimitDecision, RateLimitKey, RateLimiterBackend};
use crate::clock::{score_of, score_span, Clock, SystemClock};
use crate::error::{RatelogError, Result};
use crate::store::{BatchAtomicity, OpReply, StoreOp, TimeOrderedStore, WindowEntry};

/// Extra key lifetime past the window, absorbing clock skew between replicas.
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Deadline applied to store round trips unless the caller passes its own.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Position of the cardinality reply in the check batch.
const CARDINALITY_REPLY: usize = 2;

/// What happens to the log entry of a denied request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenyPolicy {
    /// Keep it. Denied requests keep occupying a slot until they age out.
    #[default]
    Retain,
    /// Remove it with a follow-up command, so repeated denied probes do not
    /// extend the lockout.
    Remove,
}

/// Store-backed sliding window log limiter.
///
/// Holds no per-key state in process; any number of instances, threads or
/// replicas can share one store. Per-key consistency is exactly the store's
/// [`BatchAtomicity`].
pub struct SlidingWindowLimiter<S> {
    store: S,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
    deny_policy: DenyPolicy,
}

impl<S: TimeOrderedStore> SlidingWindowLimiter<S> {
    /// Create a limiter over `store` using the system clock.
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock::new()),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            deny_policy: DenyPolicy::default(),
        }
    }

    /// Use `clock` for request timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Default deadline for [`SlidingWindowLimiter::check`].
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_deny_policy(mut self, policy: DenyPolicy) -> Self {
        self.deny_policy = policy;
        self
    }

    /// Get the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Batch guarantee of the underlying store.
    pub fn atomicity(&self) -> BatchAtomicity {
        self.store.atomicity()
    }

    pub fn deny_policy(&self) -> DenyPolicy {
        self.deny_policy
    }

    /// Record a request for `key` and decide it against `spec`.
    pub async fn check(&self, key: &RateLimitKey, spec: &LimitSpec) -> Result<RateLimitDecision> {
        self.check_within(key, spec, self.store_timeout).await
    }

    /// Like [`SlidingWindowLimiter::check`] with an explicit deadline.
    ///
    /// The engine never retries. Dropping the returned future abandons the
    /// round trip.
    pub async fn check_within(
        &self,
        key: &RateLimitKey,
        spec: &LimitSpec,
        timeout: Duration,
    ) -> Result<RateLimitDecision> {
        let now = self.clock.now();
        let now_score = score_of(now);
        let window_start = now_score.saturating_sub(score_span(spec.window()));
        let member = format!("{}-{}", now_score, Uuid::new_v4().simple());
        let store_key = key.shared();

        trace!(
            key = %key,
            limit = spec.limit(),
            window = ?spec.window(),
            "Checking rate limit"
        );

        let ops = vec![
            StoreOp::remove_before(store_key.clone(), window_start),
            StoreOp::Insert {
                key: store_key.clone(),
                entry: WindowEntry::new(now_score, member.clone()),
            },
            StoreOp::Cardinality {
                key: store_key.clone(),
            },
            StoreOp::Expire {
                key: store_key.clone(),
                ttl: spec.window().saturating_add(EXPIRY_MARGIN),
            },
        ];

        let replies = self.run_batch(ops, timeout).await?;
        let count = match replies.get(CARDINALITY_REPLY) {
            Some(OpReply::Cardinality(count)) => *count,
            other => {
                return Err(RatelogError::PartialBatchFailure {
                    index: Some(CARDINALITY_REPLY),
                    reason: format!("expected a cardinality reply, got {:?}", other),
                })
            }
        };

        let decision = RateLimitDecision::from_count(count, spec, now);

        if !decision.allowed {
            debug!(
                key = %key,
                count,
                limit = spec.limit(),
                "Rate limit exceeded"
            );

            if self.deny_policy == DenyPolicy::Remove {
                let cleanup = vec![StoreOp::RemoveMember {
                    key: store_key,
                    member,
                }];
                if let Err(err) = self.run_batch(cleanup, timeout).await {
                    warn!(key = %key, error = %err, "Failed to remove denied entry");
                }
            }
        }

        Ok(decision)
    }

    async fn run_batch(&self, ops: Vec<StoreOp>, timeout: Duration) -> Result<Vec<OpReply>> {
        match tokio::time::timeout(timeout, self.store.execute_batch(ops)).await {
            Ok(result) => result,
            Err(_) => Err(RatelogError::Timeout { timeout }),
        }
    }
}

#[async_trait]
impl<S: TimeOrderedStore> RateLimiterBackend for SlidingWindowLimiter<S> {
    async fn check(&self, key: &RateLimitKey, spec: &LimitSpec) -> Result<RateLimitDecision> {
        SlidingWindowLimiter::check(self, key, spec).await
    }

    async fn check_within(
        &self,
        key: &RateLimitKey,
        spec: &LimitSpec,
        timeout: Duration,
    ) -> Result<RateLimitDecision> {
        SlidingWindowLimiter::check_within(self, key, spec, timeout).await
    }
}

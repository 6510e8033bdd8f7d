//! Caller-side admission policy around a [`RateLimiterBackend`].
//!
//! The engine only decides. The guard owns what a request pipeline needs on
//! top: bypass rules, key prefixing, per-prefix limits, the store deadline
//! and what to do when the store is unreachable.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::headers::RateLimitHeaders;
use super::limiter::DEFAULT_STORE_TIMEOUT;
use super::rules::LimitRules;
use super::{LimitSpec, RateLimitDecision, RateLimitKey, RateLimiterBackend};
use crate::config::RatelogConfig;
use crate::error::{RatelogError, Result};

/// What the guard does when the store cannot produce a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Let the request through.
    #[default]
    Open,
    /// Reject the request.
    Closed,
}

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub enabled: bool,
    /// Prepended to every identity before it reaches the store.
    pub key_prefix: String,
    /// Limit for identities matching no rule.
    pub default_spec: LimitSpec,
    pub rules: LimitRules,
    /// Identities that are never limited.
    pub whitelist: HashSet<String>,
    pub timeout: Duration,
    pub failure_policy: FailurePolicy,
}

impl GuardConfig {
    pub fn new(default_spec: LimitSpec) -> Self {
        Self {
            enabled: true,
            key_prefix: "rate_limit:".to_string(),
            default_spec,
            rules: LimitRules::default(),
            whitelist: HashSet::new(),
            timeout: DEFAULT_STORE_TIMEOUT,
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn from_config(config: &RatelogConfig) -> Result<Self> {
        let rate_limiting = &config.rate_limiting;
        rate_limiting.rules.validate()?;

        Ok(Self {
            enabled: rate_limiting.enabled,
            key_prefix: rate_limiting.key_prefix.clone(),
            default_spec: config.default_spec()?,
            rules: rate_limiting.rules.clone(),
            whitelist: rate_limiting.whitelist.iter().cloned().collect(),
            timeout: config.store_timeout(),
            failure_policy: rate_limiting.failure_policy,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    Disabled,
    EmptyKey,
    Whitelisted,
}

/// Result of running one request through the guard.
#[derive(Debug)]
pub enum GuardOutcome {
    /// No check was made.
    Bypassed(BypassReason),
    Admitted {
        headers: RateLimitHeaders,
        decision: RateLimitDecision,
    },
    Rejected {
        headers: RateLimitHeaders,
        decision: RateLimitDecision,
    },
    /// The check failed and the request is let through.
    FailedOpen(RatelogError),
    /// The check failed and the request is rejected.
    FailedClosed(RatelogError),
}

impl GuardOutcome {
    /// Whether the caller should continue handling the request.
    pub fn should_proceed(&self) -> bool {
        matches!(
            self,
            GuardOutcome::Bypassed(_) | GuardOutcome::Admitted { .. } | GuardOutcome::FailedOpen(_)
        )
    }

    /// Headers to attach to the response, when a decision was made.
    pub fn headers(&self) -> Option<&RateLimitHeaders> {
        match self {
            GuardOutcome::Admitted { headers, .. } | GuardOutcome::Rejected { headers, .. } => {
                Some(headers)
            }
            _ => None,
        }
    }

    pub fn decision(&self) -> Option<&RateLimitDecision> {
        match self {
            GuardOutcome::Admitted { decision, .. } | GuardOutcome::Rejected { decision, .. } => {
                Some(decision)
            }
            _ => None,
        }
    }
}

pub struct RateLimitGuard<B> {
    backend: Arc<B>,
    config: GuardConfig,
}

impl<B: RateLimiterBackend> RateLimitGuard<B> {
    pub fn new(backend: Arc<B>, config: GuardConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// The limit that applies to `identity`.
    pub fn spec_for(&self, identity: &str) -> LimitSpec {
        self.config
            .rules
            .find_limit(identity)
            .and_then(|rule| rule.to_spec().ok())
            .unwrap_or(self.config.default_spec)
    }

    /// Run one request identified by `identity` through the guard.
    pub async fn evaluate(&self, identity: &str) -> GuardOutcome {
        if !self.config.enabled {
            return GuardOutcome::Bypassed(BypassReason::Disabled);
        }
        if identity.is_empty() {
            return GuardOutcome::Bypassed(BypassReason::EmptyKey);
        }
        if self.config.whitelist.contains(identity) {
            debug!(identity, "Skipping whitelisted identity");
            return GuardOutcome::Bypassed(BypassReason::Whitelisted);
        }

        let spec = self.spec_for(identity);
        let result = match RateLimitKey::new(identity) {
            Ok(key) => {
                let key = key.with_prefix(&self.config.key_prefix);
                self.backend
                    .check_within(&key, &spec, self.config.timeout)
                    .await
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(decision) => {
                let headers = RateLimitHeaders::from_decision(&decision, &spec);
                if decision.allowed {
                    GuardOutcome::Admitted { headers, decision }
                } else {
                    GuardOutcome::Rejected { headers, decision }
                }
            }
            Err(err) => {
                warn!(
                    identity,
                    error = %err,
                    policy = ?self.config.failure_policy,
                    "Rate limit check failed"
                );
                match self.config.failure_policy {
                    FailurePolicy::Open => GuardOutcome::FailedOpen(err),
                    FailurePolicy::Closed => GuardOutcome::FailedClosed(err),
                }
            }
        }
    }
}

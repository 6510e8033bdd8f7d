//! Per-key-prefix limit rules.
//!
//! Rules map a key prefix to a limit. A key picks the rule with the longest
//! matching prefix; keys matching no rule fall back to the caller's default.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use super::limit::{LimitSpec, TimeUnit};
use crate::error::{RatelogError, Result};

/// A rate limit rule specifying the limit and time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Number of requests allowed per unit of time
    pub requests_per_unit: u64,
    /// The time unit
    pub unit: TimeUnit,
    /// Optional name/description for this limit
    #[serde(default)]
    pub name: Option<String>,
}

impl RateLimitRule {
    pub fn to_spec(&self) -> Result<LimitSpec> {
        LimitSpec::per(self.requests_per_unit, self.unit)
    }
}

/// A limit applied to every key starting with `prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRule {
    pub prefix: String,
    pub rate_limit: RateLimitRule,
}

#[derive(Deserialize)]
struct RulesDocument {
    #[serde(default)]
    rules: Vec<KeyRule>,
}

/// An ordered set of prefix rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LimitRules(Vec<KeyRule>);

impl LimitRules {
    pub fn new(rules: Vec<KeyRule>) -> Self {
        Self(rules)
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse rules from YAML, either a bare list or a `rules:` mapping.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if let Ok(rules) = serde_yaml::from_str::<Vec<KeyRule>>(yaml) {
            return Ok(Self(rules));
        }

        serde_yaml::from_str::<RulesDocument>(yaml)
            .map(|doc| Self(doc.rules))
            .map_err(|e| RatelogError::Config(format!("Failed to parse rate limit rules: {}", e)))
    }

    /// Find the rule with the longest prefix of `key`.
    pub fn find_limit(&self, key: &str) -> Option<&RateLimitRule> {
        self.0
            .iter()
            .filter(|rule| key.starts_with(rule.prefix.as_str()))
            .max_by_key(|rule| rule.prefix.len())
            .map(|rule| &rule.rate_limit)
    }

    /// Reject rules that could never produce a valid [`LimitSpec`].
    pub fn validate(&self) -> Result<()> {
        for rule in &self.0 {
            if rule.prefix.is_empty() {
                return Err(RatelogError::Config(
                    "rate limit rule prefix must not be empty".to_string(),
                ));
            }
            rule.rate_limit.to_spec().map_err(|e| {
                RatelogError::Config(format!("rule '{}': {}", rule.prefix, e))
            })?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyRule> {
        self.0.iter()
    }
}

//! Rate limit key construction.

use std::sync::Arc;

use crate::error::{RatelogError, Result};

/// An opaque, non-empty key identifying who or what is being limited.
///
/// Keys are compared and stored verbatim, e.g. `ip:203.0.113.7` or `token:abc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateLimitKey(Arc<str>);

impl RateLimitKey {
    /// Create a key, rejecting empty input.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(RatelogError::InvalidKey(
                "rate limit key must not be empty".to_string(),
            ));
        }
        Ok(Self(Arc::from(key)))
    }

    /// Build `scope:id`, e.g. `RateLimitKey::scoped("user", "42")`.
    pub fn scoped(scope: &str, id: &str) -> Result<Self> {
        if id.is_empty() {
            return Err(RatelogError::InvalidKey(format!(
                "empty identifier for scope '{}'",
                scope
            )));
        }
        Self::new(format!("{}:{}", scope, id))
    }

    /// Join the non-empty parts with `:`.
    ///
    /// Fails when every part is empty.
    pub fn composite<I, S>(parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined: Vec<String> = parts
            .into_iter()
            .filter(|p| !p.as_ref().is_empty())
            .map(|p| p.as_ref().to_string())
            .collect();
        Self::new(joined.join(":"))
    }

    /// Return a copy of this key with `prefix` prepended.
    pub fn with_prefix(&self, prefix: &str) -> Self {
        Self(Arc::from(format!("{}{}", prefix, self.0)))
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn shared(&self) -> Arc<str> {
        self.0.clone()
    }
}

impl TryFrom<String> for RateLimitKey {
    type Error = RatelogError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for RateLimitKey {
    type Error = RatelogError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl AsRef<str> for RateLimitKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

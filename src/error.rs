//! Error types for ratelog.

use std::time::Duration;

use thiserror::Error;

/// Main error type for ratelog operations.
#[derive(Error, Debug)]
pub enum RatelogError {
    /// The store could not be reached or dropped the connection.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store round trip did not finish before the deadline.
    #[error("Store round trip timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// A batch failed part way; earlier commands may have been applied.
    ///
    /// `index` names the failing command when the store reports it.
    #[error("Store batch failed: {reason}")]
    PartialBatchFailure { index: Option<usize>, reason: String },

    /// Non-positive limit or window.
    #[error("Invalid limit spec: {0}")]
    InvalidSpec(String),

    /// Empty or otherwise unusable rate limit key.
    #[error("Invalid rate limit key: {0}")]
    InvalidKey(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RatelogError {
    /// True for failures talking to the store, including deadline overruns.
    ///
    /// Callers use this to apply their fail-open or fail-closed policy.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            RatelogError::StoreUnavailable(_)
                | RatelogError::Timeout { .. }
                | RatelogError::PartialBatchFailure { .. }
        )
    }
}

impl From<config::ConfigError> for RatelogError {
    fn from(err: config::ConfigError) -> Self {
        RatelogError::Config(err.to_string())
    }
}

/// Result type alias for ratelog operations.
pub type Result<T> = std::result::Result<T, RatelogError>;

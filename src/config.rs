//! Configuration management for ratelog.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RatelogError, Result};
use crate::ratelimit::{DenyPolicy, FailurePolicy, LimitRules, LimitSpec};

/// Prefix for environment overrides, e.g. `RATELOG__STORE__REDIS_URL`.
pub const ENV_PREFIX: &str = "RATELOG";

/// Main configuration for ratelog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatelogConfig {
    /// Store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store; state is lost on exit.
    Memory,
    #[default]
    Redis,
}

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Wrap each check in MULTI/EXEC
    #[serde(default = "default_atomic")]
    pub atomic: bool,

    /// Deadline for one store round trip in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            atomic: default_atomic(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_atomic() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    5000
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Requests allowed per window for keys matching no rule
    #[serde(default = "default_limit")]
    pub default_limit: u64,

    #[serde(default = "default_window_secs")]
    pub default_window_secs: u64,

    /// Prefix prepended to every key in the store
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default)]
    pub deny_policy: DenyPolicy,

    /// Keys that are never limited
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Per key-prefix limits
    #[serde(default)]
    pub rules: LimitRules,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            default_limit: default_limit(),
            default_window_secs: default_window_secs(),
            key_prefix: default_key_prefix(),
            failure_policy: FailurePolicy::default(),
            deny_policy: DenyPolicy::default(),
            whitelist: Vec::new(),
            rules: LimitRules::default(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_limit() -> u64 {
    100
}

fn default_window_secs() -> u64 {
    3600
}

fn default_key_prefix() -> String {
    "rate_limit:".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter level, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl RatelogConfig {
    /// Load configuration from an optional YAML file, then apply
    /// `RATELOG__`-prefixed environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::new(path, ::config::FileFormat::Yaml));
        }
        let config: RatelogConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: RatelogConfig =
            serde_yaml::from_str(&contents).map_err(|e| RatelogError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.default_spec()?;
        self.rate_limiting.rules.validate()?;

        if self.store.backend == StoreBackend::Redis && self.store.redis_url.is_empty() {
            return Err(RatelogError::Config(
                "store.redis_url must be set for the redis backend".to_string(),
            ));
        }
        if self.store.timeout_ms == 0 {
            return Err(RatelogError::Config(
                "store.timeout_ms must be greater than 0".to_string(),
            ));
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(RatelogError::Config(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }
        Ok(())
    }

    /// Limit applied to keys matching no rule.
    pub fn default_spec(&self) -> Result<LimitSpec> {
        LimitSpec::new(
            self.rate_limiting.default_limit,
            Duration::from_secs(self.rate_limiting.default_window_secs),
        )
        .map_err(|e| RatelogError::Config(format!("rate_limiting defaults: {}", e)))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RatelogConfig::default();

        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert!(config.store.atomic);
        assert_eq!(config.store_timeout(), Duration::from_secs(5));
        assert_eq!(config.rate_limiting.key_prefix, "rate_limit:");
        assert_eq!(config.rate_limiting.failure_policy, FailurePolicy::Open);
        assert_eq!(config.rate_limiting.deny_policy, DenyPolicy::Retain);

        let spec = config.default_spec().unwrap();
        assert_eq!(spec.limit(), 100);
        assert_eq!(spec.window(), Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
store:
  backend: memory
  timeout_ms: 250
rate_limiting:
  default_limit: 10
  default_window_secs: 60
  failure_policy: closed
  deny_policy: remove
  whitelist: ["ip:127.0.0.1"]
  rules:
    - prefix: "token:"
      rate_limit:
        requests_per_unit: 1000
        unit: hour
logging:
  level: debug
  format: json
"#;
        let config: RatelogConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store_timeout(), Duration::from_millis(250));
        assert_eq!(config.rate_limiting.failure_policy, FailurePolicy::Closed);
        assert_eq!(config.rate_limiting.deny_policy, DenyPolicy::Remove);
        assert_eq!(config.rate_limiting.whitelist, vec!["ip:127.0.0.1"]);
        assert_eq!(config.rate_limiting.rules.len(), 1);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = RatelogConfig::default();
        config.rate_limiting.default_limit = 0;
        assert!(matches!(config.validate(), Err(RatelogError::Config(_))));

        let mut config = RatelogConfig::default();
        config.rate_limiting.default_window_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(RatelogError::Config(_))));

        let mut config = RatelogConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = RatelogConfig::default();
        config.store.redis_url = String::new();
        assert!(config.validate().is_err());

        config.store.backend = StoreBackend::Memory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("ratelog-test-{}.yaml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "rate_limiting:\n  default_limit: 7\n  key_prefix: \"rl:\"").unwrap();

        let config = RatelogConfig::load(path.to_str()).unwrap();
        assert_eq!(config.rate_limiting.default_limit, 7);
        assert_eq!(config.rate_limiting.key_prefix, "rl:");

        let config = RatelogConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.rate_limiting.default_limit, 7);

        std::fs::remove_file(&path).unwrap();
    }
}

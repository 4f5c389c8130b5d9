//! # Gatehouse Config - Configuration Management
//!
//! Loads configuration from an optional file layered under `GATEHOUSE__*`
//! environment variables, e.g. `GATEHOUSE__SERVER__PORT=9000` or
//! `GATEHOUSE__STORE__RETRY__MAX_RETRIES=5`.

pub mod validation;

use std::{path::Path, time::Duration};

use config::{Config as ConfigBuilder, ConfigError, Environment, File, Map};
use gatehouse_host::DEFAULT_LIMIT;
use gatehouse_observe::LogConfig;
use gatehouse_store::{Backoff, RetryPolicy};
use serde::{Deserialize, Serialize};

pub use validation::{ValidationError, ValidationResult, validate};

/// Prefix of environment variables read by [`load`].
pub const ENV_PREFIX: &str = "GATEHOUSE";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

impl Config {
    pub fn validate(&self) -> ValidationResult<()> {
        validation::validate(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-request deadline in milliseconds. `0` disables it.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_backend() -> String {
    "memory".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { backend: default_backend(), retry: RetryConfig::default() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Exponential,
    Constant,
}

/// Retry budget of managed transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff: BackoffKind,
    /// First delay for exponential backoff, the only delay for constant.
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        let (base, max) = match policy.backoff {
            Backoff::Exponential { base, max } => (base, max),
            Backoff::Constant(delay) => (delay, delay),
        };
        Self {
            max_retries: policy.max_retries,
            backoff: BackoffKind::Exponential,
            base_delay_ms: millis(base),
            max_delay_ms: millis(max),
            jitter_ms: millis(policy.jitter),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl RetryConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        let base = Duration::from_millis(self.base_delay_ms);
        let backoff = match self.backoff {
            BackoffKind::Exponential => {
                Backoff::Exponential { base, max: Duration::from_millis(self.max_delay_ms) }
            },
            BackoffKind::Constant => Backoff::Constant(base),
        };
        RetryPolicy {
            max_retries: self.max_retries,
            backoff,
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Rows returned by list calls that set no limit. Negative lifts the cap.
    #[serde(default = "default_limit")]
    pub default_limit: i64,
}

fn default_limit() -> i64 {
    DEFAULT_LIMIT
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self { default_limit: default_limit() }
    }
}

fn environment(vars: Option<Map<String, String>>) -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .source(vars)
}

fn build(path: &Path, vars: Option<Map<String, String>>) -> Result<Config, ConfigError> {
    ConfigBuilder::builder()
        .add_source(File::from(path).required(false))
        .add_source(environment(vars))
        .build()?
        .try_deserialize()
}

/// Load configuration from file and environment
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    build(path.as_ref(), None)
}

/// Load configuration with defaults
pub fn load_or_default<P: AsRef<Path>>(path: P) -> Config {
    load(path).unwrap_or_default()
}

//! Process configuration loaded from the environment.
//!
//! Variables are read with the `IMGPIPE_` prefix, after an optional `.env`
//! file has been loaded. Field names map to SCREAMING_SNAKE_CASE, so
//! `worker_concurrency` is read from `IMGPIPE_WORKER_CONCURRENCY`.
//!
//! # Example
//!
//! ```ignore
//! use imgpipe_core::config::{load_dotenv, Settings};
//!
//! load_dotenv();
//! let settings = Settings::from_env()?;
//! println!("running {} workers", settings.worker_concurrency);
//! ```

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Prefix for every configuration variable.
pub const ENV_PREFIX: &str = "IMGPIPE_";

/// Error type for configuration loading failures.
#[derive(Debug)]
pub enum ConfigError {
    /// Environment variable deserialization failed.
    EnvyError(envy::Error),
    /// A value was present but outside its allowed range.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EnvyError(e) => write!(f, "Configuration error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::EnvyError(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<envy::Error> for ConfigError {
    fn from(err: envy::Error) -> Self {
        ConfigError::EnvyError(err)
    }
}

/// Environment profile, detected from `IMGPIPE_ENV`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Custom(String),
}

impl Environment {
    /// Detect the current environment from `IMGPIPE_ENV`.
    ///
    /// Unset means development.
    pub fn current() -> Self {
        Self::parse(std::env::var("IMGPIPE_ENV").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("production") | Some("prod") => Self::Production,
            Some("development") | Some("dev") | None => Self::Development,
            Some(other) => Self::Custom(other.to_string()),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Default `RUST_LOG` directive for this environment.
    pub fn default_log_level(&self) -> &'static str {
        match self {
            Self::Development => "debug",
            Self::Production | Self::Custom(_) => "info",
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, for development
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Settings for one imgpipe process.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Redis connection string. Unset runs queue, bus and cache in memory,
    /// which only works for a single process.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Key namespace for the job queue
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Number of concurrent workers
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Lease visibility timeout before an unacknowledged job is requeued
    #[serde(default = "default_lease_timeout_ms")]
    pub lease_timeout_ms: u64,

    /// Idle delay between lease attempts on an empty queue
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Keep completed job records instead of discarding them
    #[serde(default)]
    pub retain_completed: bool,

    /// Address the WebSocket listener binds to
    #[serde(default = "default_ws_bind")]
    pub ws_bind: String,

    /// Root directory of the filesystem blob store
    #[serde(default = "default_blob_root")]
    pub blob_root: String,

    /// HS256 secret used to validate client tokens
    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// Time-to-live of cached metadata reads
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_queue_name() -> String {
    "image-queue".to_string()
}

fn default_worker_concurrency() -> usize {
    3
}

fn default_lease_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_ws_bind() -> String {
    "0.0.0.0:8081".to_string()
}

fn default_blob_root() -> String {
    "./uploads".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Settings {
    /// Load settings from `IMGPIPE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = envy::prefixed(ENV_PREFIX).from_env::<Self>()?;
        settings.validate()
    }

    /// Load settings from an explicit list of (name, value) pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let settings = envy::prefixed(ENV_PREFIX).from_iter::<_, Self>(vars)?;
        settings.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.worker_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "worker_concurrency must be at least 1".to_string(),
            ));
        }
        if self.lease_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "lease_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Load environment variables from a `.env` file in the working directory.
///
/// Missing files are ignored and existing variables take precedence.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

//! Configuration schema definitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{ConfigError, ConfigResult};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CourierConfig {
    /// Bot API token. Usually supplied via `COURIER_TOKEN` rather than a
    /// config file.
    #[serde(default)]
    pub token: Option<String>,

    /// Base URL of the Bot API server. `None` means the hosted API.
    #[serde(default)]
    pub api_url: Option<String>,

    /// HTTP client settings.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Long polling settings.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Task pool limits.
    #[serde(default)]
    pub pools: PoolsConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CourierConfig {
    /// Rejects configurations the runtime cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.pools.max_concurrent_calls == 0 {
            return Err(ConfigError::ValidationError {
                message: "pools.max_concurrent_calls must be at least 1".to_string(),
            });
        }
        if self.pools.max_concurrent_handlers == 0 {
            return Err(ConfigError::ValidationError {
                message: "pools.max_concurrent_handlers must be at least 1".to_string(),
            });
        }
        if let Some(limit) = self.polling.limit
            && !(1..=100).contains(&limit)
        {
            return Err(ConfigError::ValidationError {
                message: format!("polling.limit must be between 1 and 100, got {limit}"),
            });
        }
        Ok(())
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Per-attempt request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Retry budget per API call.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl NetworkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    5
}

/// Long polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// How long the server may hold a `getUpdates` request, in seconds.
    #[serde(default = "default_poll_timeout_secs")]
    pub timeout_secs: u64,

    /// Batch size cap per poll (1..=100). `None` leaves it to the server.
    #[serde(default)]
    pub limit: Option<u32>,

    /// Skip the backlog that accumulated while the bot was offline.
    #[serde(default)]
    pub drop_pending: bool,

    /// Pause after a polling error before the next attempt, in seconds.
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,

    /// How long draining task pools may take at shutdown, in seconds.
    #[serde(default = "default_drain_grace_secs")]
    pub drain_grace_secs: u64,
}

impl PollingConfig {
    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_poll_timeout_secs(),
            limit: None,
            drop_pending: false,
            error_backoff_secs: default_error_backoff_secs(),
            drain_grace_secs: default_drain_grace_secs(),
        }
    }
}

fn default_poll_timeout_secs() -> u64 {
    20
}

fn default_error_backoff_secs() -> u64 {
    60
}

fn default_drain_grace_secs() -> u64 {
    10
}

/// Task pool limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolsConfig {
    /// Concurrent outbound API calls.
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// Concurrent handler chains.
    #[serde(default = "default_max_concurrent_handlers")]
    pub max_concurrent_handlers: usize,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: default_max_concurrent_calls(),
            max_concurrent_handlers: default_max_concurrent_handlers(),
        }
    }
}

fn default_max_concurrent_calls() -> usize {
    courier_core::DEFAULT_CALL_LIMIT
}

fn default_max_concurrent_handlers() -> usize {
    courier_core::DEFAULT_HANDLER_LIMIT
}

// ============================================================================
// Logging
// ============================================================================

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Output destination.
    #[serde(default)]
    pub output: LogOutput,

    /// Log file path, used when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Include thread ids in log lines.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line number in log lines.
    #[serde(default)]
    pub file_location: bool,

    /// Per-module level overrides, e.g. `courier_transport = "trace"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            thread_ids: false,
            file_location: false,
            filters: HashMap::new(),
        }
    }
}

/// Log verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Log output destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CourierConfig::default();
        config.validate().unwrap();
        assert_eq!(config.network.request_timeout_secs, 30);
        assert_eq!(config.network.max_retries, 5);
        assert_eq!(config.polling.timeout_secs, 20);
        assert!(!config.polling.drop_pending);
        assert_eq!(config.polling.drain_grace_secs, 10);
        assert_eq!(config.pools.max_concurrent_calls, 50);
        assert_eq!(config.pools.max_concurrent_handlers, 8);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn zero_pool_limits_are_rejected() {
        let mut config = CourierConfig::default();
        config.pools.max_concurrent_calls = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn polling_limit_is_range_checked() {
        let mut config = CourierConfig::default();
        config.polling.limit = Some(100);
        config.validate().unwrap();
        config.polling.limit = Some(101);
        assert!(config.validate().is_err());
        config.polling.limit = Some(0);
        assert!(config.validate().is_err());
    }
}

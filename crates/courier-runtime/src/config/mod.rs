//! Configuration module for the Courier runtime.
//!
//! This module provides TOML and environment based configuration loading
//! and validation for the bot, its network client, the polling loop, the
//! task pools and logging.

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    CourierConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, NetworkConfig, PollingConfig,
    PoolsConfig,
};

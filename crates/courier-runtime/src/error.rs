//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while assembling or driving a bot.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration loading or validation failed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No bot token in the configuration or the environment.
    #[error("No bot token configured; set `token` in courier.toml or COURIER_TOKEN")]
    MissingToken,

    /// The API client could not be built.
    #[error("API error: {0}")]
    Api(#[from] courier_core::ApiError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

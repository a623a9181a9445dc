//! Courier Runtime - Orchestration layer for the Courier bot framework.
//!
//! This crate provides:
//! - The bot handle (`Bot`) tying the transport, dispatcher and task pools
//!   together
//! - The long polling loop with offset confirmation and graceful draining
//! - Shutdown coordination (`ShutdownHandle`, `ExitCode`, signal watching)
//! - Layered configuration loading (`CourierConfig`, `ConfigLoader`)
//! - Logging configuration
//!
//! # Quick Start
//!
//! ```ignore
//! use courier_runtime::{Bot, config::load_config, logging};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     logging::init_from_config(&config.logging);
//!
//!     let bot = Bot::new(config)?;
//!     // register handlers and flows here
//!
//!     // Run until Ctrl+C; the exit code tells the supervisor what to do
//!     std::process::exit(bot.run().await.code());
//! }
//! ```
//!
//! # Lifecycle
//!
//! A run moves through three states: `Running` while the loop fetches and
//! dispatches updates, `Draining` once a stop was requested and the task
//! pools finish their backlog, and `Stopped` after the shutdown hook ran.
//! Requesting shutdown never abandons work that already started; it stops
//! intake and lets the pools drain within the configured grace period.

pub mod bot;
pub mod config;
pub mod error;
pub mod logging;
mod polling;
pub mod shutdown;

// Re-exports
pub use bot::{Bot, BotState};
pub use config::{ConfigError, ConfigLoader, ConfigResult, CourierConfig, load_config};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use shutdown::{ExitCode, ShutdownHandle, watch_signals};

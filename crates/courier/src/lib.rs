//! # Courier
//!
//! An event-driven client framework for the Telegram Bot API.
//!
//! ## Overview
//!
//! Courier turns the Bot API's long polling into an event pipeline: updates
//! are classified by type, matched against filters, and dispatched to
//! handler chains on a bounded task pool. Outbound API calls run on their
//! own pool, so a burst of handlers can never starve the network client.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐    ┌────────────┐    ┌─────────────────────────────────┐
//! │ Polling  │───▶│ Dispatcher │───▶│ Flows (temporary, first claim)  │
//! │ (Bot API)│    │            │───▶│ Handlers (permanent, filtered)  │
//! └──────────┘    └────────────┘    └───────────────┬─────────────────┘
//!                                                   │ bot.call(...)
//!                                        ┌──────────▼─────────┐
//!                                        │ Call pool ─▶ HTTP  │
//!                                        └────────────────────┘
//! ```
//!
//! - **Polling**: fetches update batches, confirms them by offset
//! - **Dispatcher**: classifies updates and routes them as pooled tasks
//! - **Flows**: removable multi-step conversations that claim updates first
//! - **Handlers**: permanent filter-gated chains, first claim ends the chain
//! - **Call pool**: bounded FIFO queue for outbound API calls
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     courier::runtime::logging::init_from_config(&config.logging);
//!     let bot = Bot::new(config)?;
//!
//!     bot.on(
//!         EventType::Message,
//!         HandlerEntry::new("echo", {
//!             let bot = bot.clone();
//!             move |msg| {
//!                 let bot = bot.clone();
//!                 async move {
//!                     let chat = msg.i64_at("chat.id").unwrap_or_default();
//!                     let text = msg.str_at("text").unwrap_or_default().to_string();
//!                     api::send_message(&bot, chat, text);
//!                 }
//!             }
//!         })
//!         .with_filters([filters::is_text()]),
//!     )?;
//!
//!     std::process::exit(bot.run().await.code());
//! }
//! ```

pub use courier_core as core;
pub use courier_runtime as runtime;
pub use courier_transport as transport;

pub mod api;

/// Prelude module for convenient imports.
///
/// This module provides all commonly used types for building bots:
///
/// ```rust,ignore
/// use courier::prelude::*;
/// ```
pub mod prelude {
    // Bot handle and lifecycle - main entry points
    pub use courier_runtime::{Bot, BotState, ExitCode, ShutdownHandle};

    // Configuration
    pub use courier_runtime::config::{CourierConfig, load_config};

    // Handlers and outcomes
    pub use courier_core::{HandlerEntry, HandlerError, Outcome};

    // Filters - gate handlers on payload shape
    pub use courier_core::Filter;
    pub use courier_core::filters;

    // Flows - temporary multi-step conversations
    pub use courier_core::{FlowBuilder, FlowContext, FlowEntry};

    // Updates and payload access
    pub use courier_core::{EventType, PayloadExt, Update};

    // API calls
    pub use crate::api;
    pub use courier_core::{InputFile, TaskHandle, TaskResult};
}

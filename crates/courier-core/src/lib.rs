//! # Courier Core
//!
//! The dispatch and scheduling engine of the courier bot framework.
//!
//! This crate provides the building blocks for an event-driven Telegram Bot
//! API client: update classification, filter-gated handler chains, temporary
//! conversation flows, and the bounded task scheduler that governs both
//! outbound API calls and handler execution.
//!
//! ## Architecture
//!
//! Updates flow through a fixed pipeline:
//!
//! ```text
//! ┌───────────┐     ┌────────────┐     ┌───────────────┐
//! │ Transport │────▶│ Dispatcher │────▶│ FlowRegistry  │  temporary flows first
//! │ (polling) │     │ (classify) │     ├───────────────┤
//! └───────────┘     └────────────┘────▶│ HandlerRegistry│  then permanent handlers
//!                          │           └───────────────┘
//!                          ▼
//!                   handler pool (at most K chains at once)
//! ```
//!
//! Each update is classified into an [`EventType`] by inspecting its payload
//! key, then routed as **one** gated unit through the [`FlowRegistry`] and,
//! if no flow consumes it, the [`HandlerRegistry`]. Handlers return an
//! [`Outcome`]: [`Outcome::Unhandled`] passes the update to the next entry
//! in the chain, anything else stops it.
//!
//! Outbound calls never block the caller: [`Pool::submit`] immediately hands
//! back a [`TaskHandle`] that can be awaited any number of times, observed,
//! or discarded. A discarded handle never swallows an error; the pool logs
//! and counts every failed task.
//!
//! ## Example
//!
//! ```rust,ignore
//! use courier_core::{Dispatcher, EventType, HandlerEntry, HandlerRegistry, Outcome};
//! use courier_core::filters::commands;
//!
//! let registry = HandlerRegistry::new();
//! registry.register(
//!     EventType::Message,
//!     HandlerEntry::new("greet", |msg| async move {
//!         println!("chat: {}", msg["chat"]["id"]);
//!         Outcome::Handled
//!     })
//!     .with_filters([commands(["start"])]),
//! )?;
//! ```

pub mod dispatcher;
pub mod error;
pub mod filters;
pub mod flow;
pub mod handler;
pub mod registry;
pub mod scheduler;
pub mod transport;
pub mod update;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{
    ApiError, ApiResult, FilterError, HandlerError, RegistryError, TaskError, TransportError,
};
pub use filters::Filter;
pub use flow::{FlowBuilder, FlowContext, FlowEntry, FlowOutcome, FlowRegistry, FlowTicket};
pub use handler::{BoxedHandler, HandlerEntry, IntoOutcome, Outcome, into_handler};
pub use registry::HandlerRegistry;
pub use scheduler::{
    DEFAULT_CALL_LIMIT, DEFAULT_HANDLER_LIMIT, Pool, PoolMetrics, TaskHandle, TaskResult,
    TaskScheduler, TaskState,
};
pub use transport::{InputFile, Transport};
pub use update::{EventType, PayloadExt, Update};

/// A boxed future, the async building block of the dispatch pipeline.
pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, T>;

/// Prelude for common imports.
pub mod prelude {
    pub use super::dispatcher::{DispatchOutcome, Dispatcher};
    pub use super::error::{ApiError, ApiResult, FilterError, HandlerError, TaskError};
    pub use super::filters::{self, Filter};
    pub use super::flow::{FlowBuilder, FlowContext, FlowEntry, FlowRegistry, FlowTicket};
    pub use super::handler::{HandlerEntry, IntoOutcome, Outcome};
    pub use super::registry::HandlerRegistry;
    pub use super::scheduler::{TaskHandle, TaskScheduler, TaskState};
    pub use super::transport::{InputFile, Transport};
    pub use super::update::{EventType, PayloadExt, Update};
}

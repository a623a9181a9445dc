//! Handlers and their outcomes.
//!
//! A handler is an async function from a payload to an [`Outcome`]:
//!
//! - [`Outcome::Handled`] stops the dispatch chain for this update
//! - [`Outcome::Unhandled`] passes the update on to the next candidate
//!
//! Handlers rarely construct outcomes by hand. Returning `()` means
//! `Handled`, and `Result<impl IntoOutcome, impl Into<HandlerError>>`
//! lets `?` flow API errors out of the handler body. A handler error
//! terminates the chain and is reported, it never reaches the poll loop.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_core::{HandlerEntry, Outcome};
//! use courier_core::filters::commands;
//!
//! let entry = HandlerEntry::new("greet", |payload| async move {
//!     let name = payload.str_at("from.first_name").unwrap_or("stranger");
//!     println!("hello {name}");
//!     Outcome::Handled
//! })
//! .with_filters([commands(["start"])]);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;

use crate::error::HandlerError;
use crate::filters::Filter;
use crate::BoxFuture;

/// What a handler decided about the update it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The update is consumed, the chain stops here.
    Handled,
    /// The update was inspected but not acted on, try the next handler.
    Unhandled,
}

/// Conversion from a handler's return value into a chain outcome.
pub trait IntoOutcome {
    fn into_outcome(self) -> Result<Outcome, HandlerError>;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Result<Outcome, HandlerError> {
        Ok(Outcome::Handled)
    }
}

impl IntoOutcome for Outcome {
    fn into_outcome(self) -> Result<Outcome, HandlerError> {
        Ok(self)
    }
}

impl<T, E> IntoOutcome for Result<T, E>
where
    T: IntoOutcome,
    E: Into<HandlerError>,
{
    fn into_outcome(self) -> Result<Outcome, HandlerError> {
        match self {
            Ok(value) => value.into_outcome(),
            Err(err) => Err(err.into()),
        }
    }
}

/// Type-erased handler function.
///
/// The payload is passed by value: handlers own their copy and may move it
/// into spawned work without lifetime ceremony.
pub type BoxedHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Outcome, HandlerError>> + Send + Sync>;

/// Erases a handler function into a [`BoxedHandler`].
pub fn into_handler<F, Fut, R>(handler: F) -> BoxedHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + 'static,
{
    Arc::new(move |payload| {
        handler(payload)
            .map(IntoOutcome::into_outcome)
            .boxed()
    })
}

// ============================================================================
// HandlerEntry
// ============================================================================

/// A named handler plus the filter chain that gates it.
///
/// Entries are cheap to clone; the handler itself is shared.
#[derive(Clone)]
pub struct HandlerEntry {
    name: Arc<str>,
    filters: Vec<Filter>,
    handler: BoxedHandler,
}

impl HandlerEntry {
    /// Creates an entry from a handler function. The name identifies the
    /// entry in logs and shadowing warnings.
    pub fn new<F, Fut, R>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoOutcome + 'static,
    {
        Self::from_boxed(name, into_handler(handler))
    }

    /// Creates an entry from an already erased handler.
    pub fn from_boxed(name: impl Into<String>, handler: BoxedHandler) -> Self {
        Self {
            name: Arc::from(name.into()),
            filters: Vec::new(),
            handler,
        }
    }

    /// Attaches the filter chain. All filters must match for the entry to
    /// run; an empty chain matches every update of the entry's event type.
    pub fn with_filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters = filters.into_iter().collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub(crate) fn is_unfiltered(&self) -> bool {
        self.filters.is_empty()
    }

    /// Runs the handler on an owned payload copy.
    pub fn invoke(&self, payload: Value) -> BoxFuture<'static, Result<Outcome, HandlerError>> {
        (self.handler)(payload)
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("name", &self.name)
            .field(
                "filters",
                &self.filters.iter().map(Filter::name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters;
    use serde_json::json;

    #[tokio::test]
    async fn unit_return_means_handled() {
        let entry = HandlerEntry::new("unit", |_payload| async {});
        let outcome = entry.invoke(json!({})).await;
        assert_eq!(outcome, Ok(Outcome::Handled));
    }

    #[tokio::test]
    async fn explicit_outcomes_pass_through() {
        let entry = HandlerEntry::new("peek", |_payload| async { Outcome::Unhandled });
        assert_eq!(entry.invoke(json!({})).await, Ok(Outcome::Unhandled));
    }

    #[tokio::test]
    async fn errors_convert_through_result() {
        let entry = HandlerEntry::new("fallible", |payload: Value| async move {
            if payload.get("ok").is_some() {
                Ok(Outcome::Handled)
            } else {
                Err(HandlerError::new("payload missing ok"))
            }
        });
        assert_eq!(entry.invoke(json!({"ok": 1})).await, Ok(Outcome::Handled));
        assert!(entry.invoke(json!({})).await.is_err());
    }

    #[tokio::test]
    async fn entries_carry_their_filters() {
        let entry = HandlerEntry::new("gated", |_payload| async {})
            .with_filters([filters::is_text(), filters::commands(["go"])]);
        assert_eq!(entry.name(), "gated");
        assert_eq!(entry.filters().len(), 2);
        assert!(!entry.is_unfiltered());
        assert!(filters::check_all(entry.filters(), &json!({"text": "/go"})).await);
    }
}

//! Filter algebra for update payloads.
//!
//! A [`Filter`] is a named, cheaply clonable predicate over a payload value.
//! Filters gate handler entries: an entry runs only when every filter in its
//! chain matches. The module is split into:
//!
//! - this file - the [`Filter`] type and chain evaluation
//! - [`combinators`] - `not` / `any` / `all` / `none` / `xor`
//! - [`builders`] - payload-shape predicates (`any_keys`, `commands`, ...)
//! - [`preset`] - ready-made filters for the common message shapes
//!
//! # Safe evaluation
//!
//! Predicates may fail (a lookup on a payload shape they did not expect).
//! A failing predicate is a non-match, never an error: [`Filter::check`]
//! maps [`FilterError`] to `false` and logs at trace level. Predicates can
//! therefore assume well-formed input and use `?` freely.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_core::filters::{all, commands, chat_types, Filter};
//!
//! let private_start = all([chat_types(["private"]), commands(["start"])]);
//! assert!(private_start.check(&payload).await);
//!
//! let long_text = Filter::try_new("long_text", |payload| {
//!     Ok(payload.require("text")?.as_str().is_some_and(|t| t.len() > 100))
//! });
//! ```

mod builders;
mod combinators;
mod preset;

pub use builders::{
    all_keys, any_keys, callback_data, callback_data_startswith, caption_commands,
    caption_regex_match, chat_ids, chat_types, commands, commands_with_prefix, from_users,
    regex_match, sub_keys, text_startswith,
};
pub use combinators::{all, any, none, not, xor};
pub use preset::{
    contains_text, has_caption, is_document, is_photo, is_reply, is_text, is_video,
};

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use serde_json::Value;
use tracing::trace;

use crate::error::FilterError;

/// The future returned by one predicate evaluation.
pub type FilterFuture<'a> = BoxFuture<'a, Result<bool, FilterError>>;

/// Object-safe predicate evaluation.
///
/// Concrete predicates (sync closures, async closures, combinators) all
/// erase to this trait so a [`Filter`] stays a single cheap handle.
pub(crate) trait Predicate: Send + Sync {
    fn eval<'a>(&'a self, payload: &'a Value) -> FilterFuture<'a>;
}

// ============================================================================
// Filter
// ============================================================================

/// A named predicate over a payload value.
///
/// Cloning is cheap: the predicate lives behind an `Arc`. The name shows up
/// in trace logs when a chain rejects an update, which is usually the only
/// way to debug a misrouted handler.
#[derive(Clone)]
pub struct Filter {
    name: Arc<str>,
    predicate: Arc<dyn Predicate>,
}

impl Filter {
    /// Creates a filter from an infallible synchronous predicate.
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self::try_new(name, move |payload| Ok(predicate(payload)))
    }

    /// Creates a filter from a fallible synchronous predicate.
    ///
    /// Errors are suppressed to a non-match at evaluation time.
    pub fn try_new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Value) -> Result<bool, FilterError> + Send + Sync + 'static,
    {
        Self::from_predicate(name, FnPredicate(predicate))
    }

    /// Creates a filter from an asynchronous predicate.
    ///
    /// The predicate receives an owned copy of the payload so it can await
    /// freely without borrowing the dispatch state.
    pub fn from_async<F, Fut>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, FilterError>> + Send + 'static,
    {
        Self::from_predicate(
            name,
            AsyncFnPredicate {
                f: predicate,
                _marker: PhantomData,
            },
        )
    }

    pub(crate) fn from_predicate<P>(name: impl Into<String>, predicate: P) -> Self
    where
        P: Predicate + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            predicate: Arc::new(predicate),
        }
    }

    /// Returns the filter's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replaces the filter's name, keeping the predicate.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = Arc::from(name.into());
        self
    }

    /// Evaluates the predicate against `payload`.
    ///
    /// A predicate error counts as a non-match.
    pub async fn check(&self, payload: &Value) -> bool {
        match self.predicate.eval(payload).await {
            Ok(verdict) => verdict,
            Err(err) => {
                trace!(
                    filter = %self.name,
                    error = %err,
                    "filter evaluation failed, treating as non-match"
                );
                false
            }
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter").field("name", &self.name).finish()
    }
}

/// Evaluates a filter chain as a logical AND, short-circuiting on the first
/// non-match. An empty chain matches everything.
pub async fn check_all(filters: &[Filter], payload: &Value) -> bool {
    for filter in filters {
        if !filter.check(payload).await {
            return false;
        }
    }
    true
}

// ============================================================================
// Predicate Adapters
// ============================================================================

struct FnPredicate<F>(F);

impl<F> Predicate for FnPredicate<F>
where
    F: Fn(&Value) -> Result<bool, FilterError> + Send + Sync,
{
    fn eval<'a>(&'a self, payload: &'a Value) -> FilterFuture<'a> {
        Box::pin(future::ready((self.0)(payload)))
    }
}

struct AsyncFnPredicate<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> Predicate for AsyncFnPredicate<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, FilterError>> + Send + 'static,
{
    fn eval<'a>(&'a self, payload: &'a Value) -> FilterFuture<'a> {
        Box::pin((self.f)(payload.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::PayloadExt;
    use serde_json::json;

    #[tokio::test]
    async fn predicate_error_is_a_non_match() {
        let filter = Filter::try_new("wants_chat", |payload: &Value| {
            Ok(payload.require("chat.id")?.is_number())
        });
        assert!(filter.check(&json!({"chat": {"id": 5}})).await);
        assert!(!filter.check(&json!({"text": "no chat here"})).await);
    }

    #[tokio::test]
    async fn async_predicates_compose_with_sync_ones() {
        let sync_filter = Filter::new("has_text", |payload: &Value| {
            payload.str_at("text").is_some()
        });
        let async_filter = Filter::from_async("slow_yes", |_payload| async move {
            tokio::task::yield_now().await;
            Ok(true)
        });

        let payload = json!({"text": "hello"});
        let chain = [sync_filter, async_filter];
        assert!(check_all(&chain, &payload).await);
        assert!(!check_all(&chain, &json!({})).await);
    }

    #[tokio::test]
    async fn empty_chain_matches_everything() {
        assert!(check_all(&[], &json!({"anything": true})).await);
    }

    #[tokio::test]
    async fn chain_short_circuits_on_first_non_match() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let evaluated = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&evaluated);
        let never = Filter::new("never", |_| false);
        let counting = Filter::new("counting", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        assert!(!check_all(&[never, counting], &json!({})).await);
        assert_eq!(evaluated.load(Ordering::SeqCst), 0);
    }
}

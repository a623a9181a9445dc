//! Update classification and chain dispatch.
//!
//! The dispatcher is the seam between the polling loop and the handler
//! machinery. For every inbound [`Update`] it:
//!
//! 1. classifies the update by payload key, dropping unknown types
//! 2. submits one task to the chains pool running the full chain: flows
//!    first, permanent handlers second
//!
//! The whole chain for one update runs as a single pooled task, so the
//! handler concurrency limit counts updates in flight, not individual
//! handler invocations.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::flow::{FlowOutcome, FlowRegistry};
use crate::registry::HandlerRegistry;
use crate::scheduler::{Pool, TaskHandle};
use crate::update::{EventType, Update};

/// Which stage of the chain consumed an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A flow claimed the update.
    Flow,
    /// A permanent handler claimed the update.
    Permanent,
    /// Nobody claimed the update; it was dropped (and logged).
    Unhandled,
}

struct DispatcherInner {
    registry: HandlerRegistry,
    flows: FlowRegistry,
    chains: Pool<DispatchOutcome>,
}

/// Routes classified updates through flows and permanent handlers.
///
/// Cloning is cheap and shares the underlying registries and pool.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(
        registry: HandlerRegistry,
        flows: FlowRegistry,
        chains: Pool<DispatchOutcome>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                registry,
                flows,
                chains,
            }),
        }
    }

    /// The permanent handler registry behind this dispatcher.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    /// The flow registry behind this dispatcher.
    pub fn flows(&self) -> &FlowRegistry {
        &self.inner.flows
    }

    /// Queues the dispatch chain for one update.
    ///
    /// Returns `None` when the update is dropped before dispatch (unknown
    /// type or missing payload). The returned handle may be dropped; the
    /// chain still runs and failures are still logged by the pool.
    pub fn on_update(&self, update: Update) -> Option<TaskHandle<DispatchOutcome>> {
        let update_id = update.id();
        let kind = update.kind();
        if kind == EventType::Unknown {
            debug!(update_id, "update of unknown type dropped");
            return None;
        }
        let Some(payload) = update.into_payload() else {
            debug!(update_id, event = %kind, "update carries no payload, dropped");
            return None;
        };

        let registry = self.inner.registry.clone();
        let flows = self.inner.flows.clone();
        let handle = self.inner.chains.submit(kind.as_key(), async move {
            if flows.dispatch(kind, &payload).await == FlowOutcome::Consumed {
                return Ok(DispatchOutcome::Flow);
            }
            if registry.dispatch(kind, &payload).await {
                return Ok(DispatchOutcome::Permanent);
            }
            warn!(
                update_id,
                event = %kind,
                "no matching handler found, update dropped"
            );
            Ok(DispatchOutcome::Unhandled)
        });
        Some(handle)
    }

    /// Union of the event types handled by flows and permanent handlers,
    /// sorted. This is what the polling loop subscribes to; `Unknown` is
    /// excluded because it has no wire key to subscribe with.
    pub fn subscribed_event_types(&self) -> Vec<EventType> {
        let mut types = self.inner.registry.handled_event_types();
        types.extend(self.inner.flows.event_types());
        types.retain(|kind| *kind != EventType::Unknown);
        types.sort();
        types.dedup();
        types
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.inner.registry)
            .field("flows", &self.inner.flows)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters;
    use crate::flow::{FlowBuilder, FlowEntry};
    use crate::handler::{HandlerEntry, Outcome};
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            HandlerRegistry::new(),
            FlowRegistry::new(),
            Pool::new("chains", 4),
        )
    }

    fn message(update_id: i64, text: &str) -> Update {
        Update::new(
            update_id,
            EventType::Message,
            json!({"chat": {"id": 1, "type": "private"}, "text": text}),
        )
    }

    #[tokio::test]
    async fn flows_take_precedence_over_permanent_handlers() {
        let dispatcher = dispatcher();
        dispatcher
            .registry()
            .register(
                EventType::Message,
                HandlerEntry::new("permanent", |_payload| async {}),
            )
            .unwrap();
        dispatcher
            .flows()
            .register(FlowBuilder::new(EventType::Message).entry(FlowEntry::new(
                "flow",
                |_payload, _ctx| async { Outcome::Handled },
            )));

        let outcome = dispatcher
            .on_update(message(1, "hi"))
            .unwrap()
            .wait()
            .await;
        assert_eq!(outcome, Ok(DispatchOutcome::Flow));

        // Flow completed; the next update reaches the permanent chain.
        let outcome = dispatcher
            .on_update(message(2, "hi"))
            .unwrap()
            .wait()
            .await;
        assert_eq!(outcome, Ok(DispatchOutcome::Permanent));
    }

    #[tokio::test]
    async fn unknown_updates_are_dropped_before_dispatch() {
        let dispatcher = dispatcher();
        let raw: Update = serde_json::from_value(json!({
            "update_id": 9,
            "brand_new_api_field": {"x": 1}
        }))
        .unwrap();
        assert!(dispatcher.on_update(raw).is_none());
    }

    #[tokio::test]
    async fn unclaimed_updates_resolve_as_unhandled() {
        let dispatcher = dispatcher();
        dispatcher
            .registry()
            .register(
                EventType::Message,
                HandlerEntry::new("photos_only", |_payload| async {})
                    .with_filters([filters::is_photo()]),
            )
            .unwrap();

        let outcome = dispatcher
            .on_update(message(3, "not a photo"))
            .unwrap()
            .wait()
            .await;
        assert_eq!(outcome, Ok(DispatchOutcome::Unhandled));
    }

    #[tokio::test]
    async fn subscription_covers_flows_and_handlers() {
        let dispatcher = dispatcher();
        dispatcher
            .registry()
            .register(
                EventType::CallbackQuery,
                HandlerEntry::new("clicks", |_payload| async {}),
            )
            .unwrap();
        dispatcher
            .flows()
            .register(FlowBuilder::new(EventType::Message).entry(FlowEntry::new(
                "flow",
                |_payload, _ctx| async { Outcome::Handled },
            )));

        assert_eq!(
            dispatcher.subscribed_event_types(),
            vec![EventType::Message, EventType::CallbackQuery]
        );
    }
}

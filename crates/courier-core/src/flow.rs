//! Temporary handler sets ("flows") for multi-step conversations.
//!
//! A flow is a group of steps registered at runtime, usually from inside a
//! permanent handler, to capture the next updates of one event type:
//!
//! - scope filters decide which updates belong to the flow at all
//!   (typically a `chat_ids` filter pinning it to one conversation)
//! - step filters route a captured update to one step within the set
//! - a shared [`FlowContext`] carries state between steps
//!
//! Flows take precedence over permanent handlers and are exclusive: once a
//! flow's scope and at least one step filter match, the update is consumed
//! by that flow, whatever its steps decide. A step returning
//! [`Outcome::Handled`] completes the flow and removes it; returning
//! [`Outcome::Unhandled`] keeps it armed for the next update. Flows expire
//! lazily: an optional TTL is checked at dispatch time, not by a timer.
//!
//! # Example
//!
//! ```rust,ignore
//! let ticket = flows.register(
//!     FlowBuilder::new(EventType::Message)
//!         .named("countdown")
//!         .scoped([chat_ids([chat])])
//!         .context(json!({"count": 3}))
//!         .entry(FlowEntry::new("cancel", cancel_step).with_filters([commands(["cancel"])]))
//!         .entry(FlowEntry::new("tick", tick_step))
//!         .expires_in(Duration::from_secs(300)),
//! );
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::HandlerError;
use crate::filters::{check_all, Filter};
use crate::handler::{IntoOutcome, Outcome};
use crate::update::EventType;
use crate::BoxFuture;

// ============================================================================
// FlowContext
// ============================================================================

/// Mutable JSON state shared by the steps of one flow.
///
/// Clones share the same state. The usual shape is an object, which the
/// key-level helpers [`FlowContext::get`] and [`FlowContext::set`] assume;
/// [`FlowContext::read`] and [`FlowContext::write`] work on any shape.
#[derive(Clone)]
pub struct FlowContext {
    inner: Arc<Mutex<Value>>,
}

impl FlowContext {
    pub fn new(initial: Value) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    /// An empty object context.
    pub fn empty() -> Self {
        Self::new(Value::Object(Map::new()))
    }

    /// Runs `f` with shared access to the state.
    pub fn read<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        f(&self.inner.lock())
    }

    /// Runs `f` with exclusive access to the state.
    pub fn write<R>(&self, f: impl FnOnce(&mut Value) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Clones the value under `key`, if the state is an object holding one.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().get(key).cloned()
    }

    /// Inserts `key` into the state object.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let mut state = self.inner.lock();
        match state.as_object_mut() {
            Some(map) => {
                map.insert(key, value.into());
            }
            None => warn!(key = %key, "flow context is not an object, set ignored"),
        }
    }

    /// A point-in-time copy of the whole state.
    pub fn snapshot(&self) -> Value {
        self.inner.lock().clone()
    }
}

impl Default for FlowContext {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for FlowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FlowContext").field(&self.snapshot()).finish()
    }
}

// ============================================================================
// FlowEntry
// ============================================================================

/// Type-erased flow step function.
pub type BoxedFlowHandler = Arc<
    dyn Fn(Value, FlowContext) -> BoxFuture<'static, Result<Outcome, HandlerError>>
        + Send
        + Sync,
>;

/// Erases a flow step function into a [`BoxedFlowHandler`].
pub fn into_flow_handler<F, Fut, R>(handler: F) -> BoxedFlowHandler
where
    F: Fn(Value, FlowContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + 'static,
{
    Arc::new(move |payload, context| {
        handler(payload, context)
            .map(IntoOutcome::into_outcome)
            .boxed()
    })
}

/// One step of a flow: a named handler behind a step filter chain.
#[derive(Clone)]
pub struct FlowEntry {
    name: Arc<str>,
    filters: Vec<Filter>,
    handler: BoxedFlowHandler,
}

impl FlowEntry {
    pub fn new<F, Fut, R>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, FlowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoOutcome + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            filters: Vec::new(),
            handler: into_flow_handler(handler),
        }
    }

    /// Attaches the step filter chain. An unfiltered step matches every
    /// update its flow captures.
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

    fn invoke(
        &self,
        payload: Value,
        context: FlowContext,
    ) -> BoxFuture<'static, Result<Outcome, HandlerError>> {
        (self.handler)(payload, context)
    }
}

impl fmt::Debug for FlowEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowEntry")
            .field("name", &self.name)
            .field(
                "filters",
                &self.filters.iter().map(Filter::name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

// ============================================================================
// FlowBuilder
// ============================================================================

/// Assembles a flow for [`FlowRegistry::register`].
#[derive(Debug)]
pub struct FlowBuilder {
    name: Option<String>,
    event_type: EventType,
    scope: Vec<Filter>,
    entries: Vec<FlowEntry>,
    context: FlowContext,
    ttl: Option<Duration>,
}

impl FlowBuilder {
    /// Starts a flow capturing updates of `event_type`.
    pub fn new(event_type: EventType) -> Self {
        Self {
            name: None,
            event_type,
            scope: Vec::new(),
            entries: Vec::new(),
            context: FlowContext::empty(),
            ttl: None,
        }
    }

    /// Names the flow for logs. Unnamed flows get `flow-{id}`.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Scope filters deciding which updates belong to this flow. An empty
    /// scope captures every update of the flow's event type.
    pub fn scoped(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.scope = filters.into_iter().collect();
        self
    }

    /// Appends a step. Steps are tried in insertion order.
    pub fn entry(mut self, entry: FlowEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Seeds the shared context with `initial`.
    pub fn context(mut self, initial: Value) -> Self {
        self.context = FlowContext::new(initial);
        self
    }

    /// Expires the flow `ttl` after registration. Expiry is lazy: the flow
    /// is dropped the next time dispatch touches it past the deadline.
    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

// ============================================================================
// FlowSet / FlowRegistry
// ============================================================================

struct FlowSet {
    id: u64,
    name: Arc<str>,
    event_type: EventType,
    scope: Vec<Filter>,
    entries: Vec<FlowEntry>,
    context: FlowContext,
    deadline: Option<Instant>,
    /// Serializes dispatch per set so steps never observe the shared
    /// context mid-update.
    exec: tokio::sync::Mutex<()>,
    removed: AtomicBool,
}

impl FlowSet {
    fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// What flow dispatch decided about an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Some flow claimed the update; permanent handlers must not see it.
    Consumed,
    /// No flow claimed the update.
    PassThrough,
}

struct FlowRegistryInner {
    sets: RwLock<HashMap<EventType, Vec<Arc<FlowSet>>>>,
    next_id: AtomicU64,
}

/// Live temporary handler sets, keyed by event type.
///
/// Cloning is cheap and shares the registry; flows register and cancel at
/// runtime, typically from inside handlers.
#[derive(Clone)]
pub struct FlowRegistry {
    inner: Arc<FlowRegistryInner>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FlowRegistryInner {
                sets: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Registers a flow and returns its ticket.
    ///
    /// The flow is armed immediately: registering a replacement from inside
    /// a step before the old flow completes leaves no gap in coverage.
    pub fn register(&self, builder: FlowBuilder) -> FlowTicket {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let name: Arc<str> = match builder.name {
            Some(name) => Arc::from(name),
            None => Arc::from(format!("flow-{id}")),
        };
        if builder.entries.is_empty() {
            warn!(flow = %name, "flow has no steps and will never consume an update");
        }
        let set = Arc::new(FlowSet {
            id,
            name,
            event_type: builder.event_type,
            scope: builder.scope,
            entries: builder.entries,
            context: builder.context,
            deadline: builder.ttl.map(|ttl| Instant::now() + ttl),
            exec: tokio::sync::Mutex::new(()),
            removed: AtomicBool::new(false),
        });
        self.inner
            .sets
            .write()
            .entry(set.event_type)
            .or_default()
            .push(Arc::clone(&set));
        debug!(
            flow = %set.name,
            event = %set.event_type,
            steps = set.entries.len(),
            "flow registered"
        );
        FlowTicket {
            set,
            registry: self.clone(),
        }
    }

    /// Offers `payload` to the flows registered for `event_type`.
    ///
    /// Sets are tried in registration order. The first set whose scope and
    /// at least one step filter match consumes the update; its steps are
    /// then tried in order until one returns [`Outcome::Handled`] (flow
    /// completes) or the steps run out (flow stays armed). A set whose
    /// scope matches but whose step filters all reject passes the update
    /// on to later sets and, failing those, to the permanent handlers.
    pub async fn dispatch(&self, event_type: EventType, payload: &Value) -> FlowOutcome {
        let candidates: Vec<Arc<FlowSet>> = match self.inner.sets.read().get(&event_type) {
            Some(sets) => sets.clone(),
            None => return FlowOutcome::PassThrough,
        };
        for set in candidates {
            let _serial = set.exec.lock().await;
            if set.removed.load(Ordering::Acquire) {
                continue;
            }
            if set.is_expired() {
                self.remove(&set, "expired");
                continue;
            }
            if !check_all(&set.scope, payload).await {
                continue;
            }

            let mut matched_step = false;
            for entry in &set.entries {
                if !check_all(entry.filters(), payload).await {
                    continue;
                }
                matched_step = true;
                match entry.invoke(payload.clone(), set.context.clone()).await {
                    Ok(Outcome::Handled) => {
                        self.remove(&set, "completed");
                        return FlowOutcome::Consumed;
                    }
                    Ok(Outcome::Unhandled) => {
                        debug!(
                            flow = %set.name,
                            step = entry.name(),
                            "flow step declined, trying the next step"
                        );
                    }
                    Err(err) => {
                        warn!(
                            flow = %set.name,
                            step = entry.name(),
                            error = %err,
                            "flow step failed, update consumed"
                        );
                        return FlowOutcome::Consumed;
                    }
                }
            }
            if matched_step {
                // Steps saw the update but none completed: the flow stays
                // armed and the update stops here.
                return FlowOutcome::Consumed;
            }
            debug!(
                flow = %set.name,
                "flow scope matched but no step filters did, passing the update on"
            );
        }
        FlowOutcome::PassThrough
    }

    /// Event types with at least one live flow, sorted.
    pub fn event_types(&self) -> Vec<EventType> {
        let sets = self.inner.sets.read();
        let mut types: Vec<EventType> = sets
            .iter()
            .filter(|(_, sets)| !sets.is_empty())
            .map(|(event_type, _)| *event_type)
            .collect();
        types.sort();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sets.read().values().all(Vec::is_empty)
    }

    fn remove(&self, set: &Arc<FlowSet>, reason: &str) {
        if set.removed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut sets = self.inner.sets.write();
        if let Some(live) = sets.get_mut(&set.event_type) {
            live.retain(|candidate| candidate.id != set.id);
        }
        debug!(flow = %set.name, reason, "flow removed");
    }
}

impl Default for FlowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FlowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sets = self.inner.sets.read();
        let live: HashMap<&EventType, usize> =
            sets.iter().map(|(ty, sets)| (ty, sets.len())).collect();
        f.debug_struct("FlowRegistry").field("sets", &live).finish()
    }
}

// ============================================================================
// FlowTicket
// ============================================================================

/// Handle to a registered flow.
///
/// Dropping the ticket does not cancel the flow; call
/// [`FlowTicket::cancel`] to remove it early.
#[derive(Clone)]
pub struct FlowTicket {
    set: Arc<FlowSet>,
    registry: FlowRegistry,
}

impl FlowTicket {
    /// Removes the flow if it is still registered.
    pub fn cancel(&self) {
        self.registry.remove(&self.set, "cancelled");
    }

    /// True while the flow can still capture updates.
    pub fn is_active(&self) -> bool {
        !self.set.removed.load(Ordering::Acquire) && !self.set.is_expired()
    }

    /// The flow's shared step context.
    pub fn context(&self) -> FlowContext {
        self.set.context.clone()
    }

    pub fn name(&self) -> &str {
        &self.set.name
    }

    pub fn id(&self) -> u64 {
        self.set.id
    }
}

impl fmt::Debug for FlowTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowTicket")
            .field("id", &self.set.id)
            .field("name", &self.set.name)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn chat(id: i64, text: &str) -> Value {
        json!({"chat": {"id": id, "type": "private"}, "text": text})
    }

    #[tokio::test]
    async fn scope_pins_a_flow_to_its_chat() {
        let flows = FlowRegistry::new();
        let ticket = flows.register(
            FlowBuilder::new(EventType::Message)
                .named("pinned")
                .scoped([filters::chat_ids([1])])
                .entry(FlowEntry::new("take", |_payload, _ctx| async {
                    Outcome::Handled
                })),
        );

        assert_eq!(
            flows.dispatch(EventType::Message, &chat(2, "hi")).await,
            FlowOutcome::PassThrough
        );
        assert!(ticket.is_active());

        assert_eq!(
            flows.dispatch(EventType::Message, &chat(1, "hi")).await,
            FlowOutcome::Consumed
        );
        assert!(!ticket.is_active());
        assert!(flows.is_empty());
    }

    #[tokio::test]
    async fn unhandled_steps_keep_the_flow_armed() {
        let flows = FlowRegistry::new();
        flows.register(
            FlowBuilder::new(EventType::Message)
                .named("countdown")
                .context(json!({"count": 2}))
                .entry(FlowEntry::new("tick", |_payload, ctx: FlowContext| async move {
                    let count = ctx.get("count").and_then(|v| v.as_i64()).unwrap_or(0);
                    if count > 0 {
                        ctx.set("count", count - 1);
                        Outcome::Unhandled
                    } else {
                        Outcome::Handled
                    }
                })),
        );

        let payload = chat(1, "tick");
        for _ in 0..2 {
            assert_eq!(
                flows.dispatch(EventType::Message, &payload).await,
                FlowOutcome::Consumed
            );
            assert!(!flows.is_empty());
        }
        // Count exhausted: the third update completes the flow.
        assert_eq!(
            flows.dispatch(EventType::Message, &payload).await,
            FlowOutcome::Consumed
        );
        assert!(flows.is_empty());
    }

    #[tokio::test]
    async fn step_filters_route_within_the_set() {
        let flows = FlowRegistry::new();
        let cancelled = Arc::new(AtomicUsize::new(0));
        let ticked = Arc::new(AtomicUsize::new(0));
        let cancel_count = Arc::clone(&cancelled);
        let tick_count = Arc::clone(&ticked);
        flows.register(
            FlowBuilder::new(EventType::Message)
                .entry(
                    FlowEntry::new("cancel", move |_payload, _ctx| {
                        let cancel_count = Arc::clone(&cancel_count);
                        async move {
                            cancel_count.fetch_add(1, Ordering::SeqCst);
                            Outcome::Handled
                        }
                    })
                    .with_filters([filters::commands(["cancel"])]),
                )
                .entry(FlowEntry::new("tick", move |_payload, _ctx| {
                    let tick_count = Arc::clone(&tick_count);
                    async move {
                        tick_count.fetch_add(1, Ordering::SeqCst);
                        Outcome::Unhandled
                    }
                })),
        );

        flows.dispatch(EventType::Message, &chat(1, "anything")).await;
        assert_eq!(cancelled.load(Ordering::SeqCst), 0);
        assert_eq!(ticked.load(Ordering::SeqCst), 1);

        assert_eq!(
            flows.dispatch(EventType::Message, &chat(1, "/cancel")).await,
            FlowOutcome::Consumed
        );
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert!(flows.is_empty());
    }

    #[tokio::test]
    async fn unmatched_steps_pass_the_update_on() {
        let flows = FlowRegistry::new();
        flows.register(
            FlowBuilder::new(EventType::Message).entry(
                FlowEntry::new("confirm", |_payload, _ctx| async { Outcome::Handled })
                    .with_filters([filters::commands(["yes"])]),
            ),
        );

        // Scope matches (it is empty) but no step filter does.
        assert_eq!(
            flows.dispatch(EventType::Message, &chat(1, "maybe")).await,
            FlowOutcome::PassThrough
        );
        assert!(!flows.is_empty());
    }

    #[tokio::test]
    async fn step_errors_consume_without_completing() {
        let flows = FlowRegistry::new();
        let ticket = flows.register(
            FlowBuilder::new(EventType::Message).entry(FlowEntry::new(
                "fragile",
                |_payload, _ctx| async { Err::<Outcome, _>(HandlerError::new("boom")) },
            )),
        );

        assert_eq!(
            flows.dispatch(EventType::Message, &chat(1, "x")).await,
            FlowOutcome::Consumed
        );
        assert!(ticket.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_is_checked_at_dispatch_time() {
        let flows = FlowRegistry::new();
        let ticket = flows.register(
            FlowBuilder::new(EventType::Message)
                .entry(FlowEntry::new("take", |_payload, _ctx| async {
                    Outcome::Handled
                }))
                .expires_in(Duration::from_secs(60)),
        );

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!ticket.is_active());
        assert_eq!(
            flows.dispatch(EventType::Message, &chat(1, "late")).await,
            FlowOutcome::PassThrough
        );
        assert!(flows.is_empty());
    }

    #[tokio::test]
    async fn cancelled_tickets_stop_capturing() {
        let flows = FlowRegistry::new();
        let ticket = flows.register(FlowBuilder::new(EventType::Message).entry(
            FlowEntry::new("take", |_payload, _ctx| async { Outcome::Handled }),
        ));
        ticket.cancel();
        assert!(!ticket.is_active());
        assert_eq!(
            flows.dispatch(EventType::Message, &chat(1, "x")).await,
            FlowOutcome::PassThrough
        );
    }

    #[tokio::test]
    async fn replacement_from_inside_a_step_leaves_no_gap() {
        let flows = FlowRegistry::new();
        let registry = flows.clone();
        flows.register(
            FlowBuilder::new(EventType::Message)
                .named("first")
                .entry(FlowEntry::new("replace", move |_payload, _ctx| {
                    let registry = registry.clone();
                    async move {
                        registry.register(
                            FlowBuilder::new(EventType::Message)
                                .named("second")
                                .entry(FlowEntry::new("take", |_payload, _ctx| async {
                                    Outcome::Handled
                                })),
                        );
                        Outcome::Handled
                    }
                })),
        );

        assert_eq!(
            flows.dispatch(EventType::Message, &chat(1, "one")).await,
            FlowOutcome::Consumed
        );
        // The replacement registered before "first" completed.
        assert!(!flows.is_empty());
        assert_eq!(
            flows.dispatch(EventType::Message, &chat(1, "two")).await,
            FlowOutcome::Consumed
        );
        assert!(flows.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_is_serialized_per_set() {
        let flows = FlowRegistry::new();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let running_in = Arc::clone(&running);
        let peak_in = Arc::clone(&peak);
        flows.register(FlowBuilder::new(EventType::Message).entry(FlowEntry::new(
            "slow",
            move |_payload, _ctx| {
                let running = Arc::clone(&running_in);
                let peak = Arc::clone(&peak_in);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Outcome::Unhandled
                }
            },
        )));

        let payload = chat(1, "x");
        tokio::join!(
            flows.dispatch(EventType::Message, &payload),
            flows.dispatch(EventType::Message, &payload),
        );
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn context_helpers_read_and_write() {
        let ctx = FlowContext::new(json!({"stage": "ask"}));
        assert_eq!(ctx.get("stage"), Some(json!("ask")));
        ctx.set("stage", "confirm");
        ctx.set("attempts", 2);
        assert_eq!(ctx.get("stage"), Some(json!("confirm")));
        let doubled = ctx.write(|state| {
            let attempts = state["attempts"].as_i64().unwrap() * 2;
            state["attempts"] = attempts.into();
            attempts
        });
        assert_eq!(doubled, 4);
        assert_eq!(ctx.snapshot(), json!({"stage": "confirm", "attempts": 4}));
    }
}

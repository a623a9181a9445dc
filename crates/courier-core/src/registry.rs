//! Permanent handler registration and chain dispatch.
//!
//! The registry keeps one ordered handler chain per event type. Dispatch
//! walks the chain top to bottom: the first entry whose filters all match
//! gets the update; if it returns [`Outcome::Unhandled`] the walk continues
//! below it. Registration is only open before polling starts; the poll loop
//! locks the registry so the set of handled event types (and with it the
//! `allowed_updates` subscription) stays stable.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::RegistryError;
use crate::filters::check_all;
use crate::handler::{HandlerEntry, Outcome};
use crate::update::EventType;

struct RegistryInner {
    entries: RwLock<HashMap<EventType, Vec<HandlerEntry>>>,
    locked: AtomicBool,
}

/// Ordered permanent handler chains, one per event type.
///
/// Cloning is cheap and shares the registry.
#[derive(Clone)]
pub struct HandlerRegistry {
    inner: Arc<RegistryInner>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: RwLock::new(HashMap::new()),
                locked: AtomicBool::new(false),
            }),
        }
    }

    /// Appends `entry` to the chain for `event_type`.
    ///
    /// Fails once the registry is locked, and always for
    /// [`EventType::Unknown`]: the dispatcher drops unclassified updates, so
    /// such a chain could never run but its key would still leak into the
    /// `allowed_updates` subscription. Registering below an unfiltered entry
    /// is allowed but warned about: the new entry can never run.
    pub fn register(
        &self,
        event_type: EventType,
        entry: HandlerEntry,
    ) -> Result<(), RegistryError> {
        if event_type == EventType::Unknown {
            return Err(RegistryError::UnknownEventType);
        }
        if self.is_locked() {
            return Err(RegistryError::Locked);
        }
        let mut entries = self.inner.entries.write();
        let chain = entries.entry(event_type).or_default();
        if let Some(shadow) = chain.iter().find(|existing| existing.is_unfiltered()) {
            warn!(
                event = %event_type,
                handler = entry.name(),
                shadowed_by = shadow.name(),
                "handler is registered below an unfiltered handler and may never be triggered"
            );
        }
        trace!(event = %event_type, handler = entry.name(), "handler registered");
        chain.push(entry);
        Ok(())
    }

    /// Walks the chain for `event_type` against `payload`.
    ///
    /// Returns `true` when some entry consumed the update. A handler error
    /// also counts as consumed: the chain is terminated and the error is
    /// logged, it never propagates to the poll loop.
    pub async fn dispatch(&self, event_type: EventType, payload: &Value) -> bool {
        let chain: Vec<HandlerEntry> = match self.inner.entries.read().get(&event_type) {
            Some(chain) => chain.clone(),
            None => return false,
        };
        for entry in &chain {
            if !check_all(entry.filters(), payload).await {
                continue;
            }
            match entry.invoke(payload.clone()).await {
                Ok(Outcome::Handled) => {
                    trace!(event = %event_type, handler = entry.name(), "update handled");
                    return true;
                }
                Ok(Outcome::Unhandled) => {
                    debug!(
                        event = %event_type,
                        handler = entry.name(),
                        "handler declined the update, trying the next one"
                    );
                }
                Err(err) => {
                    warn!(
                        event = %event_type,
                        handler = entry.name(),
                        error = %err,
                        "handler failed, chain terminated"
                    );
                    return true;
                }
            }
        }
        false
    }

    /// Event types with at least one registered handler, sorted.
    pub fn handled_event_types(&self) -> Vec<EventType> {
        let entries = self.inner.entries.read();
        let mut types: Vec<EventType> = entries
            .iter()
            .filter(|(_, chain)| !chain.is_empty())
            .map(|(event_type, _)| *event_type)
            .collect();
        types.sort();
        types
    }

    /// Closes the registry for further registration.
    pub fn lock(&self) {
        self.inner.locked.store(true, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.inner.locked.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().values().all(Vec::is_empty)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.inner.entries.read();
        let chains: HashMap<&EventType, usize> =
            entries.iter().map(|(ty, chain)| (ty, chain.len())).collect();
        f.debug_struct("HandlerRegistry")
            .field("chains", &chains)
            .field("locked", &self.is_locked())
            .finish()
    }
}

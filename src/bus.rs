//! Typed publish/subscribe hub for pre-send lifecycle events.
//!
//! Pure fan-out: delivery is synchronous and in subscription order, with no
//! buffering or replay. A listener registered after an emission never sees
//! that event. A panicking listener is isolated so the remaining listeners
//! for the same event still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::SendFailure;
use crate::types::Message;

/// The kinds of lifecycle events the bus distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The out-of-band asset upload for a draft finished (either way).
    FileUploadStatusChange,
    /// The server acknowledged a sent message.
    MessageSendSuccess,
    /// The channel reported a send failure.
    MessageSendFail,
    /// The orchestrator abandoned a send after its timeout.
    MessageSendTimeout,
}

/// An immutable fact describing a state transition for one local message.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// Upload finished; carries the draft with its patched content and
    /// `file_upload_result` stamped.
    FileUploadStatusChange(Message),
    /// Send acknowledged; carries the server-confirmed message.
    MessageSendSuccess(Message),
    /// Send failed; carries the failure keyed by local message id.
    MessageSendFail(SendFailure),
    /// Send timed out; carries the synthesized failure.
    MessageSendTimeout(SendFailure),
}

impl LifecycleEvent {
    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            LifecycleEvent::FileUploadStatusChange(_) => EventKind::FileUploadStatusChange,
            LifecycleEvent::MessageSendSuccess(_) => EventKind::MessageSendSuccess,
            LifecycleEvent::MessageSendFail(_) => EventKind::MessageSendFail,
            LifecycleEvent::MessageSendTimeout(_) => EventKind::MessageSendTimeout,
        }
    }

    /// The local message id the event refers to, when it carries one.
    pub fn local_message_id(&self) -> Option<&str> {
        match self {
            LifecycleEvent::FileUploadStatusChange(m)
            | LifecycleEvent::MessageSendSuccess(m) => Some(m.local_message_id()),
            LifecycleEvent::MessageSendFail(f) | LifecycleEvent::MessageSendTimeout(f) => {
                f.local_message_id()
            }
        }
    }
}

/// A registered listener callback.
pub type Listener = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Handle returned by [`EventBus::on`]/[`EventBus::once`], used to
/// unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Entry {
    id: SubscriptionId,
    once: bool,
    listener: Listener,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<Entry>>,
}

/// Typed publish/subscribe hub scoped to pre-send lifecycle events.
#[derive(Default)]
pub struct EventBus {
    registry: Mutex<Registry>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind.
    pub fn on(
        &self,
        kind: EventKind,
        listener: impl Fn(&LifecycleEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.register(kind, Arc::new(listener), false)
    }

    /// Register a listener that is removed after its first delivery.
    pub fn once(
        &self,
        kind: EventKind,
        listener: impl Fn(&LifecycleEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.register(kind, Arc::new(listener), true)
    }

    fn register(&self, kind: EventKind, listener: Listener, once: bool) -> SubscriptionId {
        let mut registry = match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        registry.next_id = registry.next_id.wrapping_add(1);
        let id = SubscriptionId(registry.next_id);
        registry
            .listeners
            .entry(kind)
            .or_default()
            .push(Entry { id, once, listener });
        id
    }

    /// Remove a subscription. Idempotent: removing an unknown or already
    /// removed id is a no-op.
    pub fn off(&self, id: SubscriptionId) {
        let mut registry = match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for entries in registry.listeners.values_mut() {
            entries.retain(|entry| entry.id != id);
        }
    }

    /// Deliver an event to all listeners currently registered for its kind,
    /// synchronously and in subscription order.
    ///
    /// One-shot listeners are deregistered before invocation, so a listener
    /// that emits from inside its own callback cannot be re-entered.
    pub fn emit(&self, event: &LifecycleEvent) {
        let to_invoke: Vec<Listener> = {
            let mut registry = match self.registry.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match registry.listeners.get_mut(&event.kind()) {
                Some(entries) => {
                    let snapshot = entries
                        .iter()
                        .map(|entry| Arc::clone(&entry.listener))
                        .collect();
                    entries.retain(|entry| !entry.once);
                    snapshot
                }
                None => Vec::new(),
            }
        };

        for listener in to_invoke {
            // Isolate listener panics: one broken subscriber must not stop
            // delivery to the rest.
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(kind = ?event.kind(), "event listener panicked during delivery");
            }
        }
    }

    /// Number of listeners currently registered for a kind.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        match self.registry.lock() {
            Ok(registry) => registry.listeners.get(&kind).map_or(0, Vec::len),
            Err(_) => 0,
        }
    }
}

//! Authoritative snapshot store for outstanding provisional messages.
//!
//! The [`PresendEventsManager`] is the single source of truth for "what do we
//! currently know about draft X". Every mutation flows through
//! [`PresendEventsManager::emit`], which applies the event to the stash
//! *before* fanning it out on the bus, so a synchronous read immediately
//! after `emit` returns always observes the update — even when nobody was
//! listening at emission time.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::bus::{EventBus, EventKind, LifecycleEvent, SubscriptionId};
use crate::types::{Message, MessageStatus};

/// Snapshot store plus event fan-in/fan-out for provisional messages.
///
/// Call sites register listeners here rather than on the bus directly; the
/// bus is an implementation detail of the manager.
#[derive(Default)]
pub struct PresendEventsManager {
    bus: EventBus,
    stash: Mutex<HashMap<String, Message>>,
}

impl PresendEventsManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stash a freshly created provisional message.
    ///
    /// There is exactly one stashed entry per local message id; re-adding
    /// replaces the previous snapshot.
    pub fn add(&self, message: Message) {
        let id = message.local_message_id().to_owned();
        self.with_stash(|stash| {
            stash.insert(id.clone(), message);
        });
        debug!(local_message_id = %id, "provisional message stashed");
    }

    /// Publish a lifecycle event.
    ///
    /// The stash is updated first, then the event fans out to listeners.
    pub fn emit(&self, event: LifecycleEvent) {
        self.apply(&event);
        self.bus.emit(&event);
    }

    /// Latest known snapshot for a local message id.
    pub fn get_stashed_local_message(&self, local_message_id: &str) -> Option<Message> {
        self.with_stash(|stash| stash.get(local_message_id).cloned())
    }

    /// Stamp the local lifecycle status of a stashed message.
    pub fn update_local_message_status(&self, local_message_id: &str, status: MessageStatus) {
        self.with_stash(|stash| {
            if let Some(message) = stash.get_mut(local_message_id) {
                message.status = status;
            }
        });
    }

    /// Drop a message from the live set once its send has been resolved and
    /// consumed. Returns the final snapshot.
    pub fn remove_local_message(&self, local_message_id: &str) -> Option<Message> {
        self.with_stash(|stash| stash.remove(local_message_id))
    }

    /// Number of outstanding provisional messages.
    pub fn stashed_count(&self) -> usize {
        self.with_stash(|stash| stash.len())
    }

    /// Register a listener for one event kind.
    pub fn on(
        &self,
        kind: EventKind,
        listener: impl Fn(&LifecycleEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.bus.on(kind, listener)
    }

    /// Register a listener removed after its first delivery.
    pub fn once(
        &self,
        kind: EventKind,
        listener: impl Fn(&LifecycleEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.bus.once(kind, listener)
    }

    /// Remove a subscription. Idempotent.
    pub fn off(&self, id: SubscriptionId) {
        self.bus.off(id);
    }

    /// Number of listeners registered for a kind (test observability).
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.bus.listener_count(kind)
    }

    fn apply(&self, event: &LifecycleEvent) {
        match event {
            // The upload task hands back the whole patched draft; replace the
            // snapshot so content and upload result stay consistent.
            LifecycleEvent::FileUploadStatusChange(message) => {
                let id = message.local_message_id().to_owned();
                self.with_stash(|stash| {
                    stash.insert(id, message.clone());
                });
            }
            LifecycleEvent::MessageSendSuccess(message) => {
                self.update_local_message_status(
                    message.local_message_id(),
                    MessageStatus::SendSuccess,
                );
            }
            LifecycleEvent::MessageSendFail(failure) => {
                if let Some(id) = failure.local_message_id() {
                    self.update_local_message_status(id, MessageStatus::SendFail);
                }
            }
            LifecycleEvent::MessageSendTimeout(failure) => {
                if let Some(id) = failure.local_message_id() {
                    self.update_local_message_status(id, MessageStatus::SendTimeout);
                }
            }
        }
    }

    fn with_stash<R>(&self, f: impl FnOnce(&mut HashMap<String, Message>) -> R) -> R {
        let mut stash = match self.stash.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut stash)
    }
}

//! Send orchestration: "send this message and resolve exactly once".
//!
//! [`SendMessageService`] drives a provisional message through its
//! content-type precondition (upload completion for image/file drafts),
//! hands the wire payload to the transport channel, and then races three
//! independent signal sources — the success event, the failure event, and a
//! timer — into a first-writer-wins settler. Whichever producer settles
//! first decides the outcome; later signals are observably ignored, every
//! listener is unsubscribed on every branch, and exactly one terminal tracer
//! call fires.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::bus::{EventKind, LifecycleEvent};
use crate::channel::{MessageChannel, RequestOptions, RequestScene};
use crate::error::{ChatError, SendFailure};
use crate::presend::{PresendEventsManager, PresendMessageFactory};
use crate::trace::ReportEventsTracer;
use crate::types::{
    FileUploadResult, MergedSendOptions, Message, MessageStatus, SendMessagePayload, SendOptions,
};

/// The terminal outcome of one send race.
#[derive(Debug)]
enum SendOutcome {
    /// The server-confirmed message arrived.
    Success(Message),
    /// A failure event (or a throwing channel call) arrived.
    Failure(SendFailure),
    /// The timer won.
    Timeout,
}

/// Single-assignment resolver shared by the race participants.
///
/// The first producer to call [`Settle::settle`] wins; every later call is
/// a no-op. This makes "resolve exactly once, then clean up" explicit
/// instead of leaning on channel semantics.
struct Settle {
    tx: Mutex<Option<oneshot::Sender<SendOutcome>>>,
}

impl Settle {
    fn new(tx: oneshot::Sender<SendOutcome>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Attempt to settle. Returns whether this call won the race.
    fn settle(&self, outcome: SendOutcome) -> bool {
        let sender = {
            let mut slot = match self.tx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.take()
        };
        match sender {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }
}

/// Collaborators the service is composed from. Each is separately
/// constructible so tests can substitute any seam.
pub struct SendMessageServiceProps {
    /// Builds drafts and wire payloads.
    pub factory: Arc<PresendMessageFactory>,
    /// Snapshot store and lifecycle event hub.
    pub manager: Arc<PresendEventsManager>,
    /// Transport seam.
    pub channel: Arc<dyn MessageChannel>,
    /// Observability spans.
    pub tracer: Arc<ReportEventsTracer>,
}

/// Root orchestrator of the delivery pipeline.
pub struct SendMessageService {
    factory: Arc<PresendMessageFactory>,
    manager: Arc<PresendEventsManager>,
    channel: Arc<dyn MessageChannel>,
    tracer: Arc<ReportEventsTracer>,
}

impl SendMessageService {
    /// Compose the service from its collaborators.
    pub fn new(props: SendMessageServiceProps) -> Self {
        Self {
            factory: props.factory,
            manager: props.manager,
            channel: props.channel,
            tracer: props.tracer,
        }
    }

    /// Send a provisional message and resolve exactly once.
    ///
    /// Resolves with the server-confirmed message, or rejects with a typed
    /// error on upload failure, send failure, or timeout. The returned
    /// future always settles within `send_timeout` plus negligible overhead.
    ///
    /// # Errors
    ///
    /// - [`ChatError::UploadFailed`] when the required asset upload failed
    /// - [`ChatError::SendFailed`] when the channel reported a failure
    /// - [`ChatError::SendTimeout`] when no terminal event arrived in time
    pub async fn send_message(
        &self,
        message: Message,
        options: SendOptions,
    ) -> Result<Message, ChatError> {
        let merged = options.merge_defaults();
        info!(
            local_message_id = %message.local_message_id(),
            content_type = ?message.content_type,
            "sending message"
        );

        let message = if message.content_type.requires_upload() && !merged.is_regen_message {
            self.await_upload_finish(message).await?
        } else {
            message
        };

        let payload = self.factory.send_message_structure(&message, &merged);
        self.send_channel_message(payload, &merged).await
    }

    /// Resume pulling an interrupted reply. Fire-and-forget: the resumed
    /// stream reports through lifecycle events, not through this call.
    pub fn resume_message(&self, message: &Message, options: SendOptions) {
        let merged = options.merge_defaults();
        let payload = self.factory.send_message_structure(message, &merged);
        let request = RequestOptions {
            scene: RequestScene::ResumeMessage,
            between_chunk_timeout: merged.between_chunk_timeout,
            ..RequestOptions::default()
        };
        let channel = Arc::clone(&self.channel);
        let id = payload.local_message_id.clone();
        tokio::spawn(async move {
            if let Err(e) = channel.send_message(payload, request).await {
                warn!(local_message_id = %id, error = %e, "resume request failed");
            }
        });
    }

    /// Wait for the upload precondition of an image/file draft.
    ///
    /// Consults the stash first so an already-known answer short-circuits
    /// the wait; otherwise subscribes for the upload status change of this
    /// draft. There is no timeout here — the uploader owns its own deadline.
    async fn await_upload_finish(&self, message: Message) -> Result<Message, ChatError> {
        let id = message.local_message_id().to_owned();

        if let Some(stashed) = self.manager.get_stashed_local_message(&id) {
            match stashed.file_upload_result {
                Some(FileUploadResult::Success) => return Ok(stashed),
                Some(FileUploadResult::Failure) => {
                    warn!(local_message_id = %id, "upload already failed, rejecting send");
                    return Err(ChatError::UploadFailed {
                        local_message_id: id,
                    });
                }
                None => {}
            }
        }

        let (tx, rx) = oneshot::channel::<Result<Message, ()>>();
        let slot = Mutex::new(Some(tx));
        let wanted = id.clone();
        let subscription = self.manager.on(EventKind::FileUploadStatusChange, move |event| {
            let LifecycleEvent::FileUploadStatusChange(updated) = event else {
                return;
            };
            if updated.local_message_id() != wanted {
                return;
            }
            let sender = {
                let mut guard = match slot.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard.take()
            };
            if let Some(tx) = sender {
                let result = match updated.file_upload_result {
                    Some(FileUploadResult::Success) => Ok(updated.clone()),
                    _ => Err(()),
                };
                let _ = tx.send(result);
            }
        });

        let outcome = rx.await;
        self.manager.off(subscription);
        match outcome {
            Ok(Ok(updated)) => Ok(updated),
            _ => {
                warn!(local_message_id = %id, "upload failed while waiting, rejecting send");
                Err(ChatError::UploadFailed {
                    local_message_id: id,
                })
            }
        }
    }

    /// Run the three-way send race for a fully prepared payload.
    async fn send_channel_message(
        &self,
        payload: SendMessagePayload,
        options: &MergedSendOptions,
    ) -> Result<Message, ChatError> {
        let id = payload.local_message_id.clone();
        let (tx, rx) = oneshot::channel();
        let settle = Arc::new(Settle::new(tx));

        self.tracer.send_message.start(&id);

        // Terminal signal source 1: the success event for this draft.
        let success_settle = Arc::clone(&settle);
        let success_id = id.clone();
        let success_sub = self.manager.on(EventKind::MessageSendSuccess, move |event| {
            let LifecycleEvent::MessageSendSuccess(confirmed) = event else {
                return;
            };
            if confirmed.local_message_id() == success_id {
                success_settle.settle(SendOutcome::Success(confirmed.clone()));
            }
        });

        // Terminal signal source 2: the failure event for this draft.
        let fail_settle = Arc::clone(&settle);
        let fail_id = id.clone();
        let fail_sub = self.manager.on(EventKind::MessageSendFail, move |event| {
            let LifecycleEvent::MessageSendFail(failure) = event else {
                return;
            };
            if failure.local_message_id() == Some(fail_id.as_str()) {
                fail_settle.settle(SendOutcome::Failure(failure.clone()));
            }
        });

        // Kick off the transport. For streaming sends completion arrives via
        // the bus; a channel call that errors out is treated exactly like a
        // failure event.
        let channel = Arc::clone(&self.channel);
        let channel_settle = Arc::clone(&settle);
        let channel_id = id.clone();
        let request = RequestOptions {
            scene: RequestScene::SendMessage,
            between_chunk_timeout: options.between_chunk_timeout,
            ..RequestOptions::default()
        };
        // Deliberately not aborted on settle: for streaming sends this task
        // keeps pulling the reply long after the ack settles the race.
        tokio::spawn(async move {
            if let Err(e) = channel.send_message(payload, request).await {
                warn!(local_message_id = %channel_id, error = %e, "channel send call failed");
                let failure = match e {
                    ChatError::SendFailed { failure } => failure,
                    other => SendFailure::for_message(other.to_string(), channel_id.clone()),
                };
                channel_settle.settle(SendOutcome::Failure(failure));
            }
        });

        // Terminal signal source 3: the timer.
        let timer_settle = Arc::clone(&settle);
        let send_timeout = options.send_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(send_timeout).await;
            timer_settle.settle(SendOutcome::Timeout);
        });

        // The timer task guarantees the receiver settles; a closed channel
        // without an outcome is treated as a timeout.
        let outcome = rx.await.unwrap_or(SendOutcome::Timeout);

        timer.abort();
        self.manager.off(success_sub);
        self.manager.off(fail_sub);

        let result = match outcome {
            SendOutcome::Success(confirmed) => {
                self.manager
                    .update_local_message_status(&id, MessageStatus::SendSuccess);
                self.tracer
                    .send_message
                    .success(&id, confirmed.log_id.clone());
                Ok(confirmed)
            }
            SendOutcome::Failure(failure) => {
                self.manager
                    .update_local_message_status(&id, MessageStatus::SendFail);
                self.tracer.send_message.error(&failure);
                Err(ChatError::from(failure))
            }
            SendOutcome::Timeout => {
                warn!(local_message_id = %id, "send timed out");
                self.manager
                    .update_local_message_status(&id, MessageStatus::SendTimeout);
                self.tracer.send_message.timeout(&id);
                // Late success/failure listeners elsewhere still deserve the
                // fact that this send was abandoned.
                self.manager.emit(LifecycleEvent::MessageSendTimeout(
                    SendFailure::for_message("message send timed out", id.clone()),
                ));
                Err(ChatError::SendTimeout {
                    local_message_id: id.clone(),
                })
            }
        };

        // Resolved and consumed: drop the draft from the live set.
        if self.manager.remove_local_message(&id).is_some() {
            debug!(local_message_id = %id, "provisional message consumed");
        }
        result
    }
}

//! Bridges channel-level facts onto the pre-send lifecycle bus.
//!
//! Runs as a background Tokio task consuming [`ChannelEvent`]s. An `Ack`
//! becomes `MessageSendSuccess`; a failure before the ack becomes
//! `MessageSendFail` and settles the send race. Everything after the ack
//! belongs to the reply pull, which only feeds the pull-stream tracer — a
//! broken pull must not retroactively fail a send the server already
//! acknowledged.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bus::LifecycleEvent;
use crate::channel::ChannelEvent;
use crate::presend::PresendEventsManager;
use crate::trace::ReportEventsTracer;

/// Translates channel events into lifecycle events.
pub struct ChunkDispatcher {
    manager: Arc<PresendEventsManager>,
    tracer: Arc<ReportEventsTracer>,
    acked: HashSet<String>,
    first_chunk_seen: HashSet<String>,
}

impl ChunkDispatcher {
    /// Spawn the dispatch loop. The task ends when the event sender side is
    /// dropped.
    pub fn spawn(
        manager: Arc<PresendEventsManager>,
        tracer: Arc<ReportEventsTracer>,
        mut events: mpsc::Receiver<ChannelEvent>,
    ) -> JoinHandle<()> {
        let mut dispatcher = Self {
            manager,
            tracer,
            acked: HashSet::new(),
            first_chunk_seen: HashSet::new(),
        };
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                dispatcher.handle(event);
            }
            debug!("channel event stream closed, dispatcher stopping");
        })
    }

    fn handle(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::FetchStart { local_message_id } => {
                self.tracer.pull_stream.start(&local_message_id);
            }
            ChannelEvent::ReadStreamStart { local_message_id } => {
                debug!(%local_message_id, "reply stream opened");
            }
            ChannelEvent::Ack { mut message, log_id } => {
                let id = message.local_message_id().to_owned();
                self.tracer.pull_stream.receive_ack(&id, log_id.clone());
                self.acked.insert(id.clone());
                message.log_id = log_id;
                info!(local_message_id = %id, "send acknowledged");
                self.manager.emit(LifecycleEvent::MessageSendSuccess(message));
            }
            ChannelEvent::ReplyChunk { message } => {
                let id = message.local_message_id().to_owned();
                if self.first_chunk_seen.insert(id.clone()) {
                    self.tracer
                        .pull_stream
                        .receive_first_answer_chunk(&id, message.log_id.clone());
                }
            }
            ChannelEvent::AllSuccess {
                local_message_id,
                reply_id,
            } => {
                debug!(%local_message_id, ?reply_id, "reply stream completed");
                self.tracer.pull_stream.success(&local_message_id, None);
                self.forget(&local_message_id);
            }
            ChannelEvent::FetchError { failure } => {
                self.tracer.pull_stream.error(&failure, None);
                self.manager.emit(LifecycleEvent::MessageSendFail(failure));
            }
            ChannelEvent::ReadStreamError { failure } => {
                let before_ack = failure
                    .local_message_id()
                    .is_none_or(|id| !self.acked.contains(id));
                self.tracer.pull_stream.error(&failure, None);
                if let Some(id) = failure.local_message_id() {
                    self.forget(id);
                }
                if before_ack {
                    // The send itself never completed: settle the race.
                    self.manager.emit(LifecycleEvent::MessageSendFail(failure));
                }
            }
            ChannelEvent::BetweenChunkTimeout {
                local_message_id, ..
            } => {
                // A truncated stream counts as a successful partial receive.
                self.tracer.pull_stream.break_off(&local_message_id);
                self.forget(&local_message_id);
            }
        }
    }

    fn forget(&mut self, local_message_id: &str) {
        self.acked.remove(local_message_id);
        self.first_chunk_seen.remove(local_message_id);
    }
}

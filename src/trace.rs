//! Per-message observability spans.
//!
//! The [`ReportEventsTracer`] correlates one trace per local message id for
//! each of two span families: the send race (`start → success | error |
//! timeout`) and the reply pull stream. Traces are deleted on their terminal
//! phase so a long-lived session never accumulates trace state. Everything
//! here is best-effort observability: tracer calls never alter send control
//! flow, and finalizing a trace that was never started is a safe no-op.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::SendFailure;

/// Phase of a trace span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracePhase {
    /// Span opened.
    Start,
    /// Server acknowledgement received (pull stream only).
    ReceiveAck,
    /// First answer chunk received (pull stream only).
    ReceiveFirstAnswerChunk,
    /// Terminal: completed successfully.
    Success,
    /// Terminal: failed.
    Error,
    /// Terminal: abandoned on timeout.
    Timeout,
}

impl TracePhase {
    /// Wire/logging name of the phase.
    pub fn as_str(self) -> &'static str {
        match self {
            TracePhase::Start => "start",
            TracePhase::ReceiveAck => "receive_ack",
            TracePhase::ReceiveFirstAnswerChunk => "receive_first_answer_chunk",
            TracePhase::Success => "success",
            TracePhase::Error => "error",
            TracePhase::Timeout => "timeout",
        }
    }
}

/// One recorded trace transition, handed to the sink.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    /// Span family ("send_message" or "pull_stream").
    pub scope: &'static str,
    /// Phase being recorded.
    pub phase: TracePhase,
    /// Local message id the span is keyed on.
    pub local_message_id: String,
    /// Wall-clock time of the transition.
    pub at: DateTime<Utc>,
    /// Milliseconds since the span's `start`, when the span exists.
    pub elapsed_ms: Option<u64>,
    /// Flattened error or context detail.
    pub detail: Option<String>,
    /// Server request log id, when known.
    pub log_id: Option<String>,
}

/// Destination for recorded trace transitions.
///
/// Injected so tests can capture events; the default sink logs through
/// `tracing`.
pub trait TraceSink: Send + Sync {
    /// Record one transition.
    fn record(&self, event: &TraceEvent);
}

/// Default sink: structured log lines via `tracing`.
#[derive(Debug, Default)]
pub struct LogSink;

impl TraceSink for LogSink {
    fn record(&self, event: &TraceEvent) {
        info!(
            scope = event.scope,
            phase = event.phase.as_str(),
            local_message_id = %event.local_message_id,
            elapsed_ms = event.elapsed_ms,
            detail = event.detail.as_deref(),
            log_id = event.log_id.as_deref(),
            "trace"
        );
    }
}

/// Shared span bookkeeping for one scope.
struct TracerCore {
    scope: &'static str,
    started: Mutex<HashMap<String, Instant>>,
    sink: Arc<dyn TraceSink>,
}

impl TracerCore {
    fn new(scope: &'static str, sink: Arc<dyn TraceSink>) -> Self {
        Self {
            scope,
            started: Mutex::new(HashMap::new()),
            sink,
        }
    }

    /// Open a span. A duplicate `start` keeps the original clock.
    fn start(&self, local_message_id: &str) {
        self.with_map(|map| {
            map.entry(local_message_id.to_owned()).or_insert_with(Instant::now);
        });
        self.record(TracePhase::Start, local_message_id, Some(0), None, None);
    }

    /// Record a non-terminal phase; the span stays open.
    fn checkpoint(&self, phase: TracePhase, local_message_id: &str, log_id: Option<String>) {
        let elapsed = self.elapsed_ms(local_message_id);
        self.record(phase, local_message_id, elapsed, None, log_id);
    }

    /// Record a terminal phase and delete the span. No-op when the span was
    /// never started.
    fn finish(
        &self,
        phase: TracePhase,
        local_message_id: &str,
        detail: Option<String>,
        log_id: Option<String>,
    ) {
        let started = self.with_map(|map| map.remove(local_message_id));
        let Some(started) = started else {
            return;
        };
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.record(phase, local_message_id, Some(elapsed), detail, log_id);
    }

    fn elapsed_ms(&self, local_message_id: &str) -> Option<u64> {
        self.with_map(|map| {
            map.get(local_message_id)
                .map(|started| u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX))
        })
    }

    fn record(
        &self,
        phase: TracePhase,
        local_message_id: &str,
        elapsed_ms: Option<u64>,
        detail: Option<String>,
        log_id: Option<String>,
    ) {
        self.sink.record(&TraceEvent {
            scope: self.scope,
            phase,
            local_message_id: local_message_id.to_owned(),
            at: Utc::now(),
            elapsed_ms,
            detail,
            log_id,
        });
    }

    fn active(&self) -> usize {
        self.with_map(|map| map.len())
    }

    fn with_map<R>(&self, f: impl FnOnce(&mut HashMap<String, Instant>) -> R) -> R {
        let mut map = match self.started.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut map)
    }
}

/// Span family for the send race: `start → success | error | timeout`.
pub struct SendMessageTracer {
    core: TracerCore,
}

impl SendMessageTracer {
    fn new(sink: Arc<dyn TraceSink>) -> Self {
        Self {
            core: TracerCore::new("send_message", sink),
        }
    }

    /// Open the send span for a draft.
    pub fn start(&self, local_message_id: &str) {
        self.core.start(local_message_id);
    }

    /// Close the span as successful.
    pub fn success(&self, local_message_id: &str, log_id: Option<String>) {
        self.core
            .finish(TracePhase::Success, local_message_id, None, log_id);
    }

    /// Close the span as timed out.
    pub fn timeout(&self, local_message_id: &str) {
        self.core
            .finish(TracePhase::Timeout, local_message_id, None, None);
    }

    /// Close the span as failed, extracting the id from the failure.
    ///
    /// A failure without a local message id is silently ignored: transport
    /// failures can predate any send lifecycle, so there is nothing to look
    /// up and nothing to delete.
    pub fn error(&self, failure: &SendFailure) {
        let Some(id) = failure.local_message_id() else {
            return;
        };
        let detail = match failure.ext.code {
            Some(code) => format!("{} (code {code})", failure.message),
            None => failure.message.clone(),
        };
        self.core.finish(
            TracePhase::Error,
            id,
            Some(detail),
            failure.ext.log_id.clone(),
        );
    }

    /// Number of open send spans (test observability).
    pub fn active_traces(&self) -> usize {
        self.core.active()
    }
}

/// Span family for pulling the streamed reply.
pub struct PullStreamTracer {
    core: TracerCore,
}

impl PullStreamTracer {
    fn new(sink: Arc<dyn TraceSink>) -> Self {
        Self {
            core: TracerCore::new("pull_stream", sink),
        }
    }

    /// Open the pull span when the fetch starts.
    pub fn start(&self, local_message_id: &str) {
        self.core.start(local_message_id);
    }

    /// Record the server acknowledgement; the span stays open.
    pub fn receive_ack(&self, local_message_id: &str, log_id: Option<String>) {
        self.core
            .checkpoint(TracePhase::ReceiveAck, local_message_id, log_id);
    }

    /// Record the first answer chunk; the span stays open.
    pub fn receive_first_answer_chunk(&self, local_message_id: &str, log_id: Option<String>) {
        self.core
            .checkpoint(TracePhase::ReceiveFirstAnswerChunk, local_message_id, log_id);
    }

    /// Close the span as successful.
    pub fn success(&self, local_message_id: &str, content_length: Option<usize>) {
        let detail = content_length.map(|len| format!("content_length={len}"));
        self.core
            .finish(TracePhase::Success, local_message_id, detail, None);
    }

    /// Close the span as failed, extracting the id from the failure.
    /// A failure without a local message id is silently ignored.
    pub fn error(&self, failure: &SendFailure, content_length: Option<usize>) {
        let Some(id) = failure.local_message_id() else {
            return;
        };
        let detail = match content_length {
            Some(len) => format!("{} content_length={len}", failure.message),
            None => failure.message.clone(),
        };
        self.core
            .finish(TracePhase::Error, id, Some(detail), failure.ext.log_id.clone());
    }

    /// Close the span after the peer truncated the stream.
    ///
    /// Records the success phase: early termination is treated as a
    /// successful partial receive.
    pub fn break_off(&self, local_message_id: &str) {
        self.core.finish(
            TracePhase::Success,
            local_message_id,
            Some("stream break".to_owned()),
            None,
        );
    }

    /// Number of open pull spans (test observability).
    pub fn active_traces(&self) -> usize {
        self.core.active()
    }
}

/// Bundle of the two span families sharing one sink.
pub struct ReportEventsTracer {
    /// Send race spans.
    pub send_message: SendMessageTracer,
    /// Reply pull spans.
    pub pull_stream: PullStreamTracer,
}

impl ReportEventsTracer {
    /// Create a tracer recording into the given sink.
    pub fn new(sink: Arc<dyn TraceSink>) -> Self {
        Self {
            send_message: SendMessageTracer::new(Arc::clone(&sink)),
            pull_stream: PullStreamTracer::new(sink),
        }
    }
}

impl Default for ReportEventsTracer {
    fn default() -> Self {
        Self::new(Arc::new(LogSink))
    }
}

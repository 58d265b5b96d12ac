//! HTTP channel tests: a fetch that never reaches the server still closes
//! the trace span it opened and surfaces a send failure.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use chat_delivery::bus::{EventKind, LifecycleEvent};
use chat_delivery::channel::{ChunkDispatcher, HttpChunkChannel, MessageChannel, RequestOptions};
use chat_delivery::presend::PresendEventsManager;
use chat_delivery::trace::{ReportEventsTracer, TraceEvent, TracePhase, TraceSink};
use chat_delivery::types::{ContentType, SendMessagePayload};

/// Sink capturing recorded transitions.
#[derive(Default)]
struct CaptureSink {
    events: Mutex<Vec<TraceEvent>>,
}

impl TraceSink for CaptureSink {
    fn record(&self, event: &TraceEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

impl CaptureSink {
    fn pull_phases(&self) -> Vec<TracePhase> {
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.scope == "pull_stream")
                    .map(|e| e.phase)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn payload(local_message_id: &str) -> SendMessagePayload {
    SendMessagePayload {
        bot_id: None,
        conversation_id: "conv-1".to_owned(),
        local_message_id: local_message_id.to_owned(),
        content_type: ContentType::Text,
        query: "hello".to_owned(),
        user: None,
        bot_version: None,
        draft_mode: None,
        stream: true,
        chat_history: Vec::new(),
        regen_message_id: None,
        mention_list: Vec::new(),
    }
}

// Port 1 is never listening; the connection is refused immediately.
#[tokio::test]
async fn failed_fetch_closes_the_pull_span_and_fails_the_send() {
    let manager = Arc::new(PresendEventsManager::new());
    let sink = Arc::new(CaptureSink::default());
    let tracer = Arc::new(ReportEventsTracer::new(
        Arc::clone(&sink) as Arc<dyn TraceSink>
    ));
    let (tx, rx) = mpsc::channel(16);
    let handle = ChunkDispatcher::spawn(Arc::clone(&manager), Arc::clone(&tracer), rx);

    let failed = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&failed);
    manager.on(EventKind::MessageSendFail, move |event| {
        if let LifecycleEvent::MessageSendFail(failure) = event {
            if let Ok(mut failures) = log.lock() {
                failures.push(failure.clone());
            }
        }
    });

    let channel = HttpChunkChannel::new(
        "http://127.0.0.1:1/chat",
        Duration::from_millis(500),
        tx,
    )
    .expect("channel construction");

    let result = channel
        .send_message(payload("123"), RequestOptions::default())
        .await;
    assert!(result.is_err());

    drop(channel);
    handle.await.expect("dispatcher task");

    // The span opened on fetch start must be closed by the error.
    assert_eq!(tracer.pull_stream.active_traces(), 0);
    assert_eq!(sink.pull_phases(), vec![TracePhase::Start, TracePhase::Error]);
    let failed = failed.lock().expect("failure log");
    assert!(failed
        .iter()
        .any(|f| f.local_message_id() == Some("123")));
}

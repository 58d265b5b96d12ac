//! Streaming HTTP implementation of the transport channel.
//!
//! POSTs the JSON payload to the chat endpoint and reads the response body
//! as a server-sent-event style stream: UTF-8 lines prefixed with `data:`,
//! each carrying one JSON [`ChunkEnvelope`]. Channel-level facts are emitted
//! on an mpsc channel as they happen; the caller's dispatcher turns them
//! into lifecycle events.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::channel::{ChannelEvent, ChunkEnvelope, MessageChannel, RequestOptions, RequestScene};
use crate::error::{ChatError, ErrorExt, SendFailure};
use crate::types::SendMessagePayload;

/// Header naming the request scene.
const SCENE_HEADER: &str = "x-request-scene";

/// Streaming HTTP channel.
pub struct HttpChunkChannel {
    client: reqwest::Client,
    endpoint: String,
    events: mpsc::Sender<ChannelEvent>,
}

impl HttpChunkChannel {
    /// Create a channel posting to `endpoint` and emitting facts on
    /// `events`.
    ///
    /// `request_timeout` bounds connection setup only; the streamed body is
    /// bounded per chunk by [`RequestOptions::between_chunk_timeout`].
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(
        endpoint: impl Into<String>,
        request_timeout: Duration,
        events: mpsc::Sender<ChannelEvent>,
    ) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            events,
        })
    }

    async fn emit(&self, event: ChannelEvent) {
        // A dropped dispatcher just means nobody is watching anymore.
        if self.events.send(event).await.is_err() {
            debug!("channel event receiver dropped");
        }
    }

    async fn read_stream(
        &self,
        response: reqwest::Response,
        local_message_id: &str,
        between_chunk_timeout: Duration,
    ) {
        self.emit(ChannelEvent::ReadStreamStart {
            local_message_id: local_message_id.to_owned(),
        })
        .await;
        self.decode_stream(
            response.bytes_stream(),
            local_message_id,
            between_chunk_timeout,
        )
        .await;
    }

    /// Decode a chunked response body into channel events.
    ///
    /// Reassembles `data:`-prefixed lines across chunk boundaries, bounds
    /// the gap between chunks by `between_chunk_timeout`, and flushes a
    /// final line the peer did not terminate with a newline.
    async fn decode_stream<S, B, E>(
        &self,
        stream: S,
        local_message_id: &str,
        between_chunk_timeout: Duration,
    ) where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let mut stream = Box::pin(stream);
        let mut buffer = String::new();
        let mut reply_id: Option<String> = None;

        loop {
            let next = tokio::time::timeout(between_chunk_timeout, stream.next()).await;
            match next {
                Err(_) => {
                    warn!(local_message_id, "between-chunk timeout while reading stream");
                    self.emit(ChannelEvent::BetweenChunkTimeout {
                        local_message_id: local_message_id.to_owned(),
                        reply_id,
                    })
                    .await;
                    return;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    warn!(local_message_id, error = %e, "stream read failed");
                    self.emit(ChannelEvent::ReadStreamError {
                        failure: SendFailure {
                            message: format!("stream read failed: {e}"),
                            ext: ErrorExt {
                                local_message_id: Some(local_message_id.to_owned()),
                                reply_id: reply_id.clone(),
                                ..ErrorExt::default()
                            },
                        },
                    })
                    .await;
                    return;
                }
                Ok(Some(Ok(bytes))) => {
                    buffer.push_str(&String::from_utf8_lossy(bytes.as_ref()));
                    while let Some(newline) = buffer.find('\n') {
                        let line = buffer[..newline].trim().to_owned();
                        buffer.drain(..=newline);
                        self.handle_line(&line, local_message_id, &mut reply_id)
                            .await;
                    }
                }
            }
        }

        // Flush a final line the peer did not terminate.
        let residual = buffer.trim().to_owned();
        if !residual.is_empty() {
            self.handle_line(&residual, local_message_id, &mut reply_id)
                .await;
        }

        self.emit(ChannelEvent::AllSuccess {
            local_message_id: local_message_id.to_owned(),
            reply_id,
        })
        .await;
    }

    async fn handle_line(
        &self,
        line: &str,
        local_message_id: &str,
        reply_id: &mut Option<String>,
    ) {
        let Some(envelope) = parse_chunk_line(line) else {
            return;
        };
        if envelope.message.message_id.is_empty() {
            // Server always stamps ids on streamed records.
            debug!(local_message_id, "dropping chunk without message id");
            return;
        }
        if envelope.message.message_type == crate::types::MessageType::Ack {
            self.emit(ChannelEvent::Ack {
                message: envelope.message,
                log_id: envelope.log_id,
            })
            .await;
        } else {
            if reply_id.is_none() {
                *reply_id = Some(envelope.message.message_id.clone());
            }
            self.emit(ChannelEvent::ReplyChunk {
                message: envelope.message,
            })
            .await;
        }
    }
}

#[async_trait::async_trait]
impl MessageChannel for HttpChunkChannel {
    async fn send_message(
        &self,
        payload: SendMessagePayload,
        options: RequestOptions,
    ) -> Result<(), ChatError> {
        let local_message_id = payload.local_message_id.clone();
        self.emit(ChannelEvent::FetchStart {
            local_message_id: local_message_id.clone(),
        })
        .await;

        let scene = match options.scene {
            RequestScene::SendMessage => "send_message",
            RequestScene::ResumeMessage => "resume_message",
        };
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(SCENE_HEADER, scene)
            .json(&payload);
        for (name, value) in &options.headers {
            request = request.header(name, value);
        }

        // Every fetch failure surfaces as a FetchError event so the
        // dispatcher can close the pull span it opened on FetchStart; the
        // returned error alone would leave the span dangling.
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let failure = SendFailure {
                    message: format!("chat request failed: {e}"),
                    ext: ErrorExt {
                        local_message_id: Some(local_message_id),
                        ..ErrorExt::default()
                    },
                };
                self.emit(ChannelEvent::FetchError {
                    failure: failure.clone(),
                })
                .await;
                return Err(ChatError::SendFailed { failure });
            }
        };
        let status = response.status();
        if !status.is_success() {
            let failure = SendFailure {
                message: format!("chat endpoint returned status {status}"),
                ext: ErrorExt {
                    local_message_id: Some(local_message_id),
                    code: Some(i64::from(status.as_u16())),
                    ..ErrorExt::default()
                },
            };
            self.emit(ChannelEvent::FetchError {
                failure: failure.clone(),
            })
            .await;
            return Err(ChatError::SendFailed { failure });
        }

        self.read_stream(response, &local_message_id, options.between_chunk_timeout)
            .await;
        Ok(())
    }
}

/// Parse one `data:`-prefixed stream line into a chunk envelope.
///
/// Non-data lines (heartbeats, blank keep-alives) and malformed JSON are
/// skipped rather than treated as stream failures.
fn parse_chunk_line(line: &str) -> Option<ChunkEnvelope> {
    let body = line.strip_prefix("data:")?.trim();
    if body.is_empty() {
        return None;
    }
    match serde_json::from_str(body) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            debug!(error = %e, "skipping malformed stream chunk");
            None
        }
    }
}

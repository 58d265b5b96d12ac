//! Transport channel boundary.
//!
//! The orchestrator only depends on the [`MessageChannel`] trait: one call
//! kicks off the server round trip, and everything that happens afterwards
//! (acknowledgement, streamed reply, stream failure) surfaces as
//! [`ChannelEvent`]s on an mpsc channel. The [`dispatcher`] translates those
//! channel-level facts into lifecycle events on the pre-send manager; the
//! orchestrator never sees raw chunks.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{ChatError, SendFailure};
use crate::types::{Message, SendMessagePayload};

pub mod dispatcher;
pub mod http;

pub use dispatcher::ChunkDispatcher;
pub use http::HttpChunkChannel;

/// Why a request is being made; carried to the server as a hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestScene {
    /// A fresh send.
    SendMessage,
    /// Resuming an interrupted reply.
    ResumeMessage,
}

/// Per-request transport options.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Why the request is being made.
    pub scene: RequestScene,
    /// Allowed gap between streamed reply chunks.
    pub between_chunk_timeout: std::time::Duration,
    /// Extra request headers.
    pub headers: HashMap<String, String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            scene: RequestScene::SendMessage,
            between_chunk_timeout: std::time::Duration::from_millis(
                crate::types::BETWEEN_CHUNK_TIMEOUT_MS,
            ),
            headers: HashMap::new(),
        }
    }
}

/// A channel-level lifecycle fact, emitted by a [`MessageChannel`]
/// implementation while a request is in flight.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The request is about to be issued.
    FetchStart {
        /// Draft being sent.
        local_message_id: String,
    },
    /// The response stream is open and about to be read.
    ReadStreamStart {
        /// Draft being sent.
        local_message_id: String,
    },
    /// The server acknowledged the sent message.
    Ack {
        /// Server-confirmed message echoing the local message id.
        message: Message,
        /// Server request log id.
        log_id: Option<String>,
    },
    /// A streamed reply fragment arrived.
    ReplyChunk {
        /// The reply fragment.
        message: Message,
    },
    /// The whole stream completed normally.
    AllSuccess {
        /// Draft the stream belonged to.
        local_message_id: String,
        /// Reply the stream produced, when known.
        reply_id: Option<String>,
    },
    /// The request failed before any stream was opened.
    FetchError {
        /// Failure fact, correlated when possible.
        failure: SendFailure,
    },
    /// The stream broke while being read.
    ReadStreamError {
        /// Failure fact, correlated when possible.
        failure: SendFailure,
    },
    /// No chunk arrived within the between-chunk timeout.
    BetweenChunkTimeout {
        /// Draft the stream belonged to.
        local_message_id: String,
        /// Reply being pulled, when known.
        reply_id: Option<String>,
    },
}

/// One framed chunk of the streamed response body.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkEnvelope {
    /// The message record carried by the chunk.
    pub message: Message,
    /// Server request log id.
    #[serde(default)]
    pub log_id: Option<String>,
}

/// The transport seam the orchestrator sends through.
///
/// `send_message` triggers the round trip; for streaming sends the terminal
/// outcome arrives only via [`ChannelEvent`]s, not the return value. An
/// `Err` means the request could not even be issued.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Issue the send request.
    async fn send_message(
        &self,
        payload: SendMessagePayload,
        options: RequestOptions,
    ) -> Result<(), ChatError>;
}

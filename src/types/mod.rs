//! Core message types for the delivery pipeline.
//!
//! A *provisional message* is a [`Message`] created locally before the server
//! has acknowledged it: its `message_id` is empty and its identity lives in
//! `extra_info.local_message_id`. The [`SendMessagePayload`] is the flattened
//! wire structure actually posted to the chat endpoint.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default send timeout: the send race rejects after this long without a
/// terminal event (milliseconds).
pub const SEND_MESSAGE_TIMEOUT_MS: u64 = 3000;

/// Default gap allowed between two streamed reply chunks (milliseconds).
pub const BETWEEN_CHUNK_TIMEOUT_MS: u64 = 30_000;

/// Content type of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Plain text.
    Text,
    /// A single image, uploaded out of band before send.
    Image,
    /// A single file attachment, uploaded out of band before send.
    File,
    /// Audio clip.
    Audio,
    /// Structured card.
    Card,
    /// Mixed text and attachments.
    Mix,
}

impl ContentType {
    /// Whether sending this content requires a completed asset upload first.
    pub fn requires_upload(self) -> bool {
        matches!(self, ContentType::Image | ContentType::File)
    }
}

/// Outcome of the out-of-band asset upload for image/file messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileUploadResult {
    /// Upload finished and the asset is addressable by the server.
    Success,
    /// Upload failed; the message must not be sent.
    Failure,
}

/// Local lifecycle status stamped onto the stashed provisional message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Created locally, no terminal signal yet.
    Available,
    /// Server acknowledged the send.
    SendSuccess,
    /// The channel reported a send failure.
    SendFail,
    /// No terminal signal arrived within the send timeout.
    SendTimeout,
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Authored by the person chatting.
    User,
    /// Authored by the agent.
    Assistant,
}

/// Protocol-level kind of a message record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// An outbound user question.
    Question,
    /// A streamed reply fragment or final answer.
    Answer,
    /// Server acknowledgement of a sent question.
    Ack,
}

/// Free-form correlation metadata attached to every message.
///
/// `local_message_id` is the client-generated identity of the draft and the
/// key every lifecycle event is namespaced on. The accounting fields are
/// echoed back by the server and carried opaquely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtraInfo {
    /// Client-generated unique id, immutable for the draft's lifetime.
    pub local_message_id: String,
    /// Tokens consumed by the user query.
    pub input_tokens: String,
    /// Tokens consumed by the model output.
    pub output_tokens: String,
    /// Total token consumption.
    pub token: String,
    /// Intermediate call latency reported by the server.
    pub time_cost: String,
}

/// A chat message, either provisional (local draft) or server-confirmed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    /// Server-assigned id; empty for provisional messages.
    pub message_id: String,
    /// Id of the message this one replies to; empty for questions.
    pub reply_id: String,
    /// Section (topic segment) the message belongs to.
    pub section_id: String,
    /// Conversation the message belongs to.
    pub conversation_id: String,
    /// Sender identity.
    pub sender_id: String,
    /// Bot/agent the conversation targets.
    pub bot_id: Option<String>,
    /// Author role.
    pub role: MessageRole,
    /// Protocol-level record kind.
    pub message_type: MessageType,
    /// Content type of the payload.
    pub content_type: ContentType,
    /// Serialized content: raw text for [`ContentType::Text`], JSON for
    /// structured payloads.
    pub content: String,
    /// Users mentioned in the message.
    pub mention_list: Vec<String>,
    /// Correlation metadata; carries the local message id.
    pub extra_info: ExtraInfo,
    /// Latest known upload outcome for image/file content.
    pub file_upload_result: Option<FileUploadResult>,
    /// Local lifecycle status.
    pub status: MessageStatus,
    /// Server-side request log id, present once acknowledged.
    pub log_id: Option<String>,
    /// Whether the server has finished producing this record.
    pub is_finish: bool,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            message_id: String::new(),
            reply_id: String::new(),
            section_id: String::new(),
            conversation_id: String::new(),
            sender_id: String::new(),
            bot_id: None,
            role: MessageRole::User,
            message_type: MessageType::Question,
            content_type: ContentType::Text,
            content: String::new(),
            mention_list: Vec::new(),
            extra_info: ExtraInfo::default(),
            file_upload_result: None,
            status: MessageStatus::Available,
            log_id: None,
            is_finish: false,
        }
    }
}

impl Message {
    /// The client-generated identity of this message.
    pub fn local_message_id(&self) -> &str {
        &self.extra_info.local_message_id
    }
}

/// Generate a fresh local message id.
pub fn new_local_message_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// One rendition of an image (thumbnail or original).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageDetail {
    /// Addressable URL; a local preview URL until the upload completes.
    pub url: String,
    /// Pixel width, 0 until known.
    pub width: u32,
    /// Pixel height, 0 until known.
    pub height: u32,
}

/// A single image entry inside image content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageItem {
    /// Server storage key, empty until the upload completes.
    pub key: String,
    /// Thumbnail rendition.
    pub image_thumb: ImageDetail,
    /// Original rendition.
    pub image_ori: ImageDetail,
}

/// Content payload for [`ContentType::Image`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImagePayload {
    /// Images carried by the message.
    pub image_list: Vec<ImageItem>,
}

/// A single file entry inside file content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileItem {
    /// Server storage key, empty until the upload completes.
    pub file_key: String,
    /// Original file name.
    pub file_name: String,
    /// Coarse file kind derived from the extension.
    pub file_type: String,
    /// Size in bytes.
    pub file_size: u64,
    /// Download URL, empty until the upload completes.
    pub file_url: String,
}

/// Content payload for [`ContentType::File`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilePayload {
    /// Files carried by the message.
    pub file_list: Vec<FileItem>,
}

/// Metadata of a local file handed to the factory for upload-bearing messages.
#[derive(Debug, Clone, Default)]
pub struct FileMeta {
    /// File name including extension.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Local preview URL shown while the upload is in flight.
    pub preview_url: String,
}

/// Result reported by the out-of-band uploader on completion.
#[derive(Debug, Clone, Default)]
pub struct UploadResult {
    /// Server storage key of the uploaded asset.
    pub uri: String,
    /// Addressable URL of the uploaded asset.
    pub url: String,
    /// Pixel width for images, 0 otherwise.
    pub width: u32,
    /// Pixel height for images, 0 otherwise.
    pub height: u32,
}

/// The flattened wire structure posted to the chat endpoint.
///
/// Optional fields that are absent are omitted from the serialized body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessagePayload {
    /// Bot/agent the send targets.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bot_id: Option<String>,
    /// Conversation the send belongs to.
    pub conversation_id: String,
    /// Client-generated identity of the draft.
    pub local_message_id: String,
    /// Content type of the query.
    pub content_type: ContentType,
    /// Serialized message content.
    pub query: String,
    /// Sender identity.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user: Option<String>,
    /// Target bot version.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bot_version: Option<String>,
    /// Whether the conversation runs against the draft bot.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub draft_mode: Option<bool>,
    /// Whether the reply should be streamed.
    pub stream: bool,
    /// Prior turns included for context.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub chat_history: Vec<serde_json::Value>,
    /// Set when regenerating: the server message id being regenerated.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub regen_message_id: Option<String>,
    /// Users mentioned in the message.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub mention_list: Vec<String>,
}

/// Per-call send configuration supplied by the caller; unset fields fall
/// back to the [`MergedSendOptions`] defaults.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Overall send timeout.
    pub send_timeout: Option<Duration>,
    /// Allowed gap between streamed reply chunks.
    pub between_chunk_timeout: Option<Duration>,
    /// Whether the reply should be streamed.
    pub stream: Option<bool>,
    /// Prior turns included for context.
    pub chat_history: Option<Vec<serde_json::Value>>,
    /// Whether this send regenerates an existing server message.
    pub is_regen_message: bool,
}

impl SendOptions {
    /// Merge with defaults into a fully resolved option set.
    pub fn merge_defaults(&self) -> MergedSendOptions {
        MergedSendOptions {
            send_timeout: self
                .send_timeout
                .unwrap_or(Duration::from_millis(SEND_MESSAGE_TIMEOUT_MS)),
            between_chunk_timeout: self
                .between_chunk_timeout
                .unwrap_or(Duration::from_millis(BETWEEN_CHUNK_TIMEOUT_MS)),
            stream: self.stream.unwrap_or(true),
            chat_history: self.chat_history.clone().unwrap_or_default(),
            is_regen_message: self.is_regen_message,
        }
    }
}

/// Fully resolved send configuration used by the orchestrator.
#[derive(Debug, Clone)]
pub struct MergedSendOptions {
    /// Overall send timeout.
    pub send_timeout: Duration,
    /// Allowed gap between streamed reply chunks.
    pub between_chunk_timeout: Duration,
    /// Whether the reply should be streamed.
    pub stream: bool,
    /// Prior turns included for context.
    pub chat_history: Vec<serde_json::Value>,
    /// Whether this send regenerates an existing server message.
    pub is_regen_message: bool,
}

impl Default for MergedSendOptions {
    fn default() -> Self {
        SendOptions::default().merge_defaults()
    }
}

//! Provisional message construction.
//!
//! The factory standardizes how outgoing drafts are assembled: it stamps a
//! fresh local message id, fills content-type-specific defaults, stashes the
//! draft with the events manager, and (for upload-bearing content) wires the
//! caller's upload handle so completion surfaces as a
//! `FileUploadStatusChange` event. It also flattens a finished draft into the
//! wire payload. Pure construction — no network I/O here.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::bus::LifecycleEvent;
use crate::error::ChatError;
use crate::presend::manager::PresendEventsManager;
use crate::types::{
    new_local_message_id, ContentType, ExtraInfo, FileItem, FileMeta, FilePayload,
    FileUploadResult, ImageDetail, ImageItem, ImagePayload, MergedSendOptions, Message,
    SendMessagePayload, UploadResult,
};

/// Completion signal from the caller's out-of-band uploader.
///
/// Resolves with the upload result, or an error description on failure.
/// A dropped sender counts as a failed upload.
pub type UploadHandle = oneshot::Receiver<Result<UploadResult, String>>;

/// Conversation context the factory stamps onto every draft.
#[derive(Debug, Clone, Default)]
pub struct FactoryProps {
    /// Bot/agent the conversation targets.
    pub bot_id: Option<String>,
    /// Conversation every draft belongs to. Required.
    pub conversation_id: String,
    /// Sender identity.
    pub sender_id: Option<String>,
    /// Target bot version.
    pub bot_version: Option<String>,
    /// Whether the conversation runs against the draft bot.
    pub draft_mode: Option<bool>,
}

/// Builds provisional messages for one conversation.
pub struct PresendMessageFactory {
    props: FactoryProps,
    manager: Arc<PresendEventsManager>,
}

impl PresendMessageFactory {
    /// Create a factory for the given conversation context.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::MissingConversationId`] when the conversation id
    /// is empty.
    pub fn new(props: FactoryProps, manager: Arc<PresendEventsManager>) -> Result<Self, ChatError> {
        if props.conversation_id.is_empty() {
            return Err(ChatError::MissingConversationId);
        }
        Ok(Self { props, manager })
    }

    /// Create and stash a text draft.
    pub fn create_text_message(&self, text: &str, mention_list: Vec<String>) -> Message {
        let message = self.assemble_common(ContentType::Text, text.to_owned(), mention_list);
        self.manager.add(message.clone());
        message
    }

    /// Create and stash an image draft.
    ///
    /// The content starts with the local preview URL; a background task
    /// awaits `upload` and emits a `FileUploadStatusChange` with the patched
    /// content (or with a failure stamp) when the uploader completes.
    pub fn create_image_message(
        &self,
        file: &FileMeta,
        upload: UploadHandle,
        mention_list: Vec<String>,
    ) -> Message {
        let payload = ImagePayload {
            image_list: vec![ImageItem {
                key: String::new(),
                image_thumb: ImageDetail {
                    url: file.preview_url.clone(),
                    ..ImageDetail::default()
                },
                image_ori: ImageDetail {
                    url: file.preview_url.clone(),
                    ..ImageDetail::default()
                },
            }],
        };
        let content = serde_json::to_string(&payload).unwrap_or_default();
        let message = self.assemble_common(ContentType::Image, content, mention_list);
        self.manager.add(message.clone());
        self.spawn_upload_watcher(message.clone(), upload);
        message
    }

    /// Create and stash a file draft.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::UnsupportedFileType`] when the extension is not
    /// accepted.
    pub fn create_file_message(
        &self,
        file: &FileMeta,
        upload: UploadHandle,
        mention_list: Vec<String>,
    ) -> Result<Message, ChatError> {
        let file_type = file_kind(&file.name).ok_or_else(|| ChatError::UnsupportedFileType {
            name: file.name.clone(),
        })?;
        let payload = FilePayload {
            file_list: vec![FileItem {
                file_key: String::new(),
                file_name: file.name.clone(),
                file_type: file_type.to_owned(),
                file_size: file.size,
                file_url: String::new(),
            }],
        };
        let content = serde_json::to_string(&payload).unwrap_or_default();
        let message = self.assemble_common(ContentType::File, content, mention_list);
        self.manager.add(message.clone());
        self.spawn_upload_watcher(message.clone(), upload);
        Ok(message)
    }

    /// Flatten a finished draft plus resolved options into the wire payload.
    pub fn send_message_structure(
        &self,
        message: &Message,
        options: &MergedSendOptions,
    ) -> SendMessagePayload {
        SendMessagePayload {
            bot_id: self.props.bot_id.clone(),
            conversation_id: self.props.conversation_id.clone(),
            local_message_id: message.local_message_id().to_owned(),
            content_type: message.content_type,
            query: message.content.clone(),
            user: self.props.sender_id.clone(),
            bot_version: self.props.bot_version.clone(),
            draft_mode: self.props.draft_mode,
            stream: options.stream,
            chat_history: options.chat_history.clone(),
            regen_message_id: options
                .is_regen_message
                .then(|| message.message_id.clone()),
            mention_list: message.mention_list.clone(),
        }
    }

    fn assemble_common(
        &self,
        content_type: ContentType,
        content: String,
        mention_list: Vec<String>,
    ) -> Message {
        Message {
            conversation_id: self.props.conversation_id.clone(),
            sender_id: self.props.sender_id.clone().unwrap_or_default(),
            bot_id: self.props.bot_id.clone(),
            content_type,
            content,
            mention_list,
            extra_info: ExtraInfo {
                local_message_id: new_local_message_id(),
                ..ExtraInfo::default()
            },
            is_finish: true,
            ..Message::default()
        }
    }

    /// Bridge the uploader's completion into a lifecycle event.
    fn spawn_upload_watcher(&self, mut message: Message, upload: UploadHandle) {
        let manager = Arc::clone(&self.manager);
        tokio::spawn(async move {
            let id = message.local_message_id().to_owned();
            match upload.await {
                Ok(Ok(result)) => {
                    patch_uploaded_content(&mut message, &result);
                    message.file_upload_result = Some(FileUploadResult::Success);
                    debug!(local_message_id = %id, uri = %result.uri, "upload finished");
                }
                Ok(Err(reason)) => {
                    message.file_upload_result = Some(FileUploadResult::Failure);
                    warn!(local_message_id = %id, reason = %reason, "upload failed");
                }
                Err(_) => {
                    message.file_upload_result = Some(FileUploadResult::Failure);
                    warn!(local_message_id = %id, "uploader dropped before completing");
                }
            }
            manager.emit(LifecycleEvent::FileUploadStatusChange(message));
        });
    }
}

/// Patch a draft's content with the uploaded asset location.
fn patch_uploaded_content(message: &mut Message, result: &UploadResult) {
    match message.content_type {
        ContentType::Image => {
            let detail = ImageDetail {
                url: result.url.clone(),
                width: result.width,
                height: result.height,
            };
            let payload = ImagePayload {
                image_list: vec![ImageItem {
                    key: result.uri.clone(),
                    image_thumb: detail.clone(),
                    image_ori: detail,
                }],
            };
            message.content = serde_json::to_string(&payload).unwrap_or_default();
        }
        ContentType::File => {
            let mut payload: FilePayload =
                serde_json::from_str(&message.content).unwrap_or_default();
            if let Some(item) = payload.file_list.first_mut() {
                item.file_key = result.uri.clone();
                item.file_url = result.url.clone();
            }
            message.content = serde_json::to_string(&payload).unwrap_or_default();
        }
        _ => {}
    }
}

/// Coarse file kind derived from the extension; `None` for extensions the
/// pipeline does not accept.
fn file_kind(name: &str) -> Option<&'static str> {
    let extension = name.rsplit_once('.').map(|(_, ext)| ext)?;
    match extension.to_ascii_lowercase().as_str() {
        "pdf" => Some("pdf"),
        "doc" | "docx" => Some("docx"),
        "xls" | "xlsx" | "csv" => Some("excel"),
        "ppt" | "pptx" => Some("ppt"),
        "txt" | "md" => Some("txt"),
        "zip" | "tar" | "gz" | "rar" | "7z" => Some("archive"),
        "mp3" | "wav" | "m4a" | "flac" => Some("audio"),
        "mp4" | "mov" | "avi" | "webm" => Some("video"),
        "png" | "jpg" | "jpeg" | "gif" | "webp" => Some("image"),
        "js" | "ts" | "py" | "rs" | "go" | "java" | "json" => Some("code"),
        _ => None,
    }
}

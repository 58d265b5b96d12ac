//! Error types for the delivery pipeline.
//!
//! Every terminal send outcome other than success surfaces as a [`ChatError`]
//! from `SendMessageService::send_message`. Failures that travel across the
//! event bus are carried as [`SendFailure`] (a cloneable fact) and converted
//! to [`ChatError`] at the caller boundary.

/// Correlation fields attached to a send failure.
///
/// `local_message_id` may be absent: transport-level failures can occur
/// before any send lifecycle was attached (for example a connection dropped
/// during setup). Consumers must treat a missing id as "not correlatable",
/// never as an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorExt {
    /// Client-generated id of the affected draft, when known.
    pub local_message_id: Option<String>,
    /// Server or transport error code, when known.
    pub code: Option<i64>,
    /// Server-side request log id, when known.
    pub log_id: Option<String>,
    /// Id of the reply being pulled when the failure happened.
    pub reply_id: Option<String>,
}

/// An immutable send-failure fact, cloneable so it can fan out on the bus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendFailure {
    /// Human-readable description.
    pub message: String,
    /// Correlation fields.
    pub ext: ErrorExt,
}

impl SendFailure {
    /// Build a failure correlated to one local message id.
    pub fn for_message(message: impl Into<String>, local_message_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ext: ErrorExt {
                local_message_id: Some(local_message_id.into()),
                ..ErrorExt::default()
            },
        }
    }

    /// The correlated local message id, if the failure carries one.
    pub fn local_message_id(&self) -> Option<&str> {
        self.ext.local_message_id.as_deref()
    }
}

/// Errors produced by the delivery pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The required asset upload failed before the send could begin.
    #[error("upload failed for message {local_message_id}")]
    UploadFailed {
        /// Client-generated id of the affected draft.
        local_message_id: String,
    },
    /// The channel reported a send failure.
    #[error("message send failed: {}", .failure.message)]
    SendFailed {
        /// The underlying failure fact.
        failure: SendFailure,
    },
    /// No terminal signal arrived within the send timeout.
    #[error("message send timed out for message {local_message_id}")]
    SendTimeout {
        /// Client-generated id of the affected draft.
        local_message_id: String,
    },
    /// The factory was constructed without a conversation id.
    #[error("conversation id is required")]
    MissingConversationId,
    /// A file message referenced an extension the pipeline does not accept.
    #[error("unsupported file type: {name}")]
    UnsupportedFileType {
        /// Offending file name.
        name: String,
    },
    /// HTTP transport failure before any lifecycle was attached.
    #[error("transport request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ChatError {
    /// The local message id this error is correlated to, when known.
    pub fn local_message_id(&self) -> Option<&str> {
        match self {
            ChatError::UploadFailed { local_message_id }
            | ChatError::SendTimeout { local_message_id } => Some(local_message_id),
            ChatError::SendFailed { failure } => failure.local_message_id(),
            _ => None,
        }
    }
}

impl From<SendFailure> for ChatError {
    fn from(failure: SendFailure) -> Self {
        ChatError::SendFailed { failure }
    }
}

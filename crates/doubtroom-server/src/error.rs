use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use uuid::Uuid;

use doubtroom_shared::constants::NOT_A_MEMBER_MESSAGE;
use doubtroom_shared::error::CryptoError;
use doubtroom_shared::types::RoomId;
use doubtroom_store::StoreError;

/// Failures of a real-time handler. Surfaced to the client through its
/// acknowledgment or an `error` event, never as raw internal detail.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Not a member of room {0}")]
    NotAMember(RoomId),

    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("recipientId is required when the recipient is offline")]
    MissingRecipient,

    #[error("Encryption failed: {0}")]
    EncryptionFailure(#[from] CryptoError),

    #[error("Upload failed: {0}")]
    UploadFailure(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Pending queue full ({depth} entries)")]
    QueueFull { depth: usize },

    #[error("Not found")]
    NotFound,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Message safe to hand to a client.
    pub fn client_message(&self) -> String {
        match self {
            ChatError::AuthenticationRequired => "Authentication required".into(),
            ChatError::ValidationFailed(reason) => reason.clone(),
            ChatError::NotAMember(_) | ChatError::RoomNotFound(_) => NOT_A_MEMBER_MESSAGE.into(),
            ChatError::MissingRecipient => self.to_string(),
            ChatError::EncryptionFailure(_) => "Message could not be encrypted".into(),
            ChatError::UploadFailure(_) => "Attachment upload failed".into(),
            ChatError::StorageUnavailable(_) => "Service temporarily unavailable".into(),
            ChatError::QueueFull { .. } => "Recipient's message queue is full".into(),
            ChatError::NotFound => "Not found".into(),
            ChatError::Internal(_) => "Internal server error".into(),
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Internal(format!("frame encoding: {err}"))
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ChatError::NotFound,
            StoreError::QueueFull { depth } => ChatError::QueueFull { depth },
            other => ChatError::StorageUnavailable(other.to_string()),
        }
    }
}

/// Errors of the HTTP surface.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("File not found: {0}")]
    FileNotFound(Uuid),

    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: usize, max: usize },

    #[error("File storage error: {0}")]
    FileStorage(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ChatError> for ServerError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::ValidationFailed(reason) => ServerError::BadRequest(reason),
            ChatError::NotFound => ServerError::NotFound("Record not found".into()),
            ChatError::RoomNotFound(room) => ServerError::NotFound(format!("Room {room}")),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::FileNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::FileTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            ServerError::FileStorage(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "File storage error".to_string())
            }
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

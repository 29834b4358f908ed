//! WebSocket wire protocol.
//!
//! Every frame is a JSON text message. Clients send
//! `{"event": "send_message", "data": {...}, "ackId": 7}`; the server answers
//! with events (`{"event": "new_message", "data": {...}}`) and, when the
//! client supplied an `ackId`, a matching acknowledgment
//! (`{"event": "ack", "ackId": 7, "data": {...}}`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::crypto::CipherBundle;
use crate::types::{DoubtStatus, Role, RoomId, UserId};

/// Inbound event names.
pub mod inbound {
    pub const TEST: &str = "test";
    pub const PING_CHECK: &str = "ping_check";
    pub const JOIN_DOUBT_ROOM: &str = "join_doubt_room";
    pub const SEND_MESSAGE: &str = "send_message";
    pub const CHECK_MISSED_MESSAGES: &str = "check_missed_messages";
    pub const TYPING_STATUS: &str = "typing_status";
}

/// Outbound event names.
pub mod outbound {
    pub const NEW_MESSAGE: &str = "new_message";
    pub const USER_TYPING: &str = "user_typing";
    pub const DOUBT_STATUS_UPDATED: &str = "doubt_status_updated";
    pub const NEW_DOUBT: &str = "new_doubt";
    pub const DOUBT_RESOLVED: &str = "doubt_resolved";
    pub const TEST_RESPONSE: &str = "test_response";
    pub const PONG_CHECK: &str = "pong_check";
    pub const ACK: &str = "ack";
    pub const ERROR: &str = "error";
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, rename = "ackId")]
    pub ack_id: Option<u64>,
}

impl ClientFrame {
    /// Event payload as an object. Clients may send the payload pre-encoded
    /// as a JSON string; that form is unwrapped here.
    pub fn payload(&self) -> Value {
        match &self.data {
            Value::String(raw) => serde_json::from_str(raw).unwrap_or(Value::Null),
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    pub event: String,
    #[serde(default, rename = "ackId", skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<u64>,
    pub data: Value,
}

impl ServerFrame {
    pub fn event(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            ack_id: None,
            data,
        }
    }

    pub fn ack(ack_id: u64, data: Value) -> Self {
        Self {
            event: outbound::ACK.to_string(),
            ack_id: Some(ack_id),
            data,
        }
    }

    pub fn error(message: &str) -> Self {
        Self::event(outbound::ERROR, serde_json::json!({ "error": message }))
    }

    /// Serialize a typed payload into an event frame.
    pub fn typed<T: Serialize>(event: &str, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::event(event, serde_json::to_value(payload)?))
    }
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub room_id: RoomId,
    pub user_id: UserId,
    #[serde(default)]
    pub user_type: Option<String>,
    #[serde(default)]
    pub doubt_status: Option<DoubtStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub sender_model: Role,
    #[serde(default)]
    pub recipient_id: Option<UserId>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub files: Vec<FileUpload>,
}

/// A file carried inline in `send_message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUpload {
    #[serde(alias = "originalname")]
    pub name: String,
    #[serde(alias = "mimetype")]
    pub mime_type: String,
    /// Base64-encoded file bytes.
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStatusRequest {
    pub room_id: RoomId,
    pub user_id: UserId,
    #[serde(default)]
    pub status: bool,
}

// ---------------------------------------------------------------------------
// Outbound payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub file_id: String,
    pub url: String,
    pub mime_type: String,
    pub name: String,
}

/// The assembled message fanned out as `new_message` or parked in the
/// pending queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Deduplication key for re-deliveries.
    pub id: Uuid,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub sender_model: Role,
    pub recipient_id: Option<UserId>,
    pub content: Option<CipherBundle>,
    pub files: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTyping {
    pub user_id: UserId,
    pub status: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoubtStatusUpdated {
    pub room_id: RoomId,
    pub status: DoubtStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDoubt {
    pub doubt_id: Uuid,
    pub title: String,
    pub description: String,
    pub student_id: UserId,
    pub room_id: RoomId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoubtResolved {
    pub doubt_id: Uuid,
    pub room_id: RoomId,
}

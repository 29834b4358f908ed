//! Domain model structs persisted in the SQLite database.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use doubtroom_shared::protocol::ChatMessage;
use doubtroom_shared::types::{DoubtStatus, PresenceStatus, Role, RoomId, UserId};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Presence record binding a user to their most recent connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: UserId,
    /// Connection that last wrote this session. Older connections of the same
    /// user are stale.
    pub connection_id: String,
    pub status: PresenceStatus,
    pub role: Option<Role>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_online(&self) -> bool {
        self.status == PresenceStatus::Online
    }
}

/// Fields written by a session upsert.
#[derive(Debug, Clone)]
pub struct SessionUpdate {
    pub connection_id: String,
    pub status: PresenceStatus,
    /// `None` keeps whatever role is already recorded.
    pub role: Option<Role>,
}

// ---------------------------------------------------------------------------
// Pending message
// ---------------------------------------------------------------------------

/// A message parked for a recipient who was not live at send time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessage {
    /// Queue entry id; deletion after delivery is keyed by it.
    pub id: i64,
    pub user_id: UserId,
    pub room_id: RoomId,
    pub payload: ChatMessage,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// What to do when a recipient's queue is at its depth limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop the oldest entries to make room.
    EvictOldest,
    /// Refuse the new entry.
    Reject,
}

/// Queue depth limit. A `max_depth` of 0 disables the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimit {
    pub max_depth: usize,
    pub policy: OverflowPolicy,
}

impl QueueLimit {
    pub fn unbounded() -> Self {
        Self {
            max_depth: 0,
            policy: OverflowPolicy::EvictOldest,
        }
    }
}

// ---------------------------------------------------------------------------
// Typing status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingStatus {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub is_typing: bool,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Doubt
// ---------------------------------------------------------------------------

/// A student question bound to one teacher and one room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Doubt {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub student_id: UserId,
    pub teacher_id: UserId,
    pub room_id: RoomId,
    pub status: DoubtStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Doubt {
    /// A student is a member through the `student` field, a teacher through
    /// the `teacher` field.
    pub fn is_member(&self, user_id: &UserId, role: Role) -> bool {
        match role {
            Role::Student => &self.student_id == user_id,
            Role::Teacher => &self.teacher_id == user_id,
        }
    }

    /// The participant on the other side from `role`.
    pub fn counterpart(&self, role: Role) -> &UserId {
        match role {
            Role::Student => &self.teacher_id,
            Role::Teacher => &self.student_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Student or teacher profile with its denormalized presence fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: UserId,
    pub full_name: String,
    pub role: Role,
    pub status: PresenceStatus,
    pub connection_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

/// Fixed-width RFC-3339 (microseconds, `Z`) so text comparison in SQL orders
/// timestamps correctly.
pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

pub(crate) fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doubt() -> Doubt {
        Doubt {
            id: Uuid::new_v4(),
            title: "Recursion".into(),
            description: "Base case?".into(),
            student_id: UserId::new("s1"),
            teacher_id: UserId::new("t1"),
            room_id: RoomId::new("r1"),
            status: DoubtStatus::Unresolved,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn membership_checks_the_field_for_the_role() {
        let d = doubt();
        assert!(d.is_member(&UserId::new("s1"), Role::Student));
        assert!(d.is_member(&UserId::new("t1"), Role::Teacher));
        // The student id does not grant teacher membership.
        assert!(!d.is_member(&UserId::new("s1"), Role::Teacher));
        assert!(!d.is_member(&UserId::new("x"), Role::Student));
    }

    #[test]
    fn timestamps_sort_as_text() {
        let early = DateTime::parse_from_rfc3339("2026-01-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = early + chrono::Duration::milliseconds(1500);
        assert!(fmt_ts(&early) < fmt_ts(&late));
        assert_eq!(parse_ts(0, &fmt_ts(&late)).unwrap(), late);
    }
}

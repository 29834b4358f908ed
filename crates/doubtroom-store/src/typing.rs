//! Typing indicators, one row per `(room, user)` with a short TTL.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

use doubtroom_shared::constants::TYPING_TTL_SECS;
use doubtroom_shared::types::{RoomId, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::{fmt_ts, parse_ts, TypingStatus};

impl Database {
    /// Mark `user_id` as typing in `room_id`. Each call restarts the TTL.
    pub fn set_typing(&self, room_id: &RoomId, user_id: &UserId, now: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO typing_status (room_id, user_id, is_typing, started_at, expires_at)
             VALUES (?1, ?2, 1, ?3, ?4)
             ON CONFLICT(room_id, user_id) DO UPDATE SET
                 is_typing = 1,
                 started_at = excluded.started_at,
                 expires_at = excluded.expires_at",
            params![
                room_id.as_str(),
                user_id.as_str(),
                fmt_ts(&now),
                fmt_ts(&(now + Duration::seconds(TYPING_TTL_SECS))),
            ],
        )?;
        Ok(())
    }

    /// Live indicators for a room.
    pub fn list_typing(&self, room_id: &RoomId, now: DateTime<Utc>) -> Result<Vec<TypingStatus>> {
        let mut stmt = self.conn().prepare(
            "SELECT room_id, user_id, is_typing, started_at, expires_at
             FROM typing_status
             WHERE room_id = ?1 AND is_typing = 1 AND expires_at > ?2
             ORDER BY started_at ASC",
        )?;

        let rows = stmt.query_map(params![room_id.as_str(), fmt_ts(&now)], |row| {
            let started: String = row.get(3)?;
            let expires: String = row.get(4)?;
            Ok(TypingStatus {
                room_id: RoomId(row.get(0)?),
                user_id: UserId(row.get(1)?),
                is_typing: row.get(2)?,
                started_at: parse_ts(3, &started)?,
                expires_at: parse_ts(4, &expires)?,
            })
        })?;

        let mut typing = Vec::new();
        for row in rows {
            typing.push(row?);
        }
        Ok(typing)
    }

    /// Remove the indicator. Returns whether one existed.
    pub fn clear_typing(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool> {
        let removed = self.conn().execute(
            "DELETE FROM typing_status WHERE room_id = ?1 AND user_id = ?2",
            params![room_id.as_str(), user_id.as_str()],
        )?;
        Ok(removed > 0)
    }

    pub fn purge_expired_typing(&self, now: DateTime<Utc>) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM typing_status WHERE expires_at <= ?1",
            params![fmt_ts(&now)],
        )?;
        Ok(removed)
    }
}

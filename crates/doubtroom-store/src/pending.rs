//! Per-recipient queue of undelivered messages.
//!
//! Entries are FIFO per recipient (`created_at`, then insertion id). Delivery
//! removes entries by id, so a message enqueued while a flush is in flight is
//! never swept away by that flush.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

use doubtroom_shared::constants::PENDING_TTL_SECS;
use doubtroom_shared::protocol::ChatMessage;
use doubtroom_shared::types::{RoomId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{conversion_err, fmt_ts, parse_ts, OverflowPolicy, PendingMessage, QueueLimit};

const PENDING_COLUMNS: &str = "id, user_id, room_id, payload, created_at, expires_at";

impl Database {
    /// Append a message to `user_id`'s queue and return its entry id.
    ///
    /// When the queue is at `limit.max_depth`, either the oldest entries are
    /// evicted or the call fails with [`StoreError::QueueFull`].
    pub fn enqueue_pending(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        payload: &ChatMessage,
        now: DateTime<Utc>,
        limit: QueueLimit,
    ) -> Result<i64> {
        let body = serde_json::to_string(payload)?;
        let tx = self.conn().unchecked_transaction()?;

        if limit.max_depth > 0 {
            let depth: i64 = tx.query_row(
                "SELECT COUNT(*) FROM pending_messages WHERE user_id = ?1 AND expires_at > ?2",
                params![user_id.as_str(), fmt_ts(&now)],
                |row| row.get(0),
            )?;
            let depth = depth as usize;

            if depth >= limit.max_depth {
                match limit.policy {
                    OverflowPolicy::Reject => {
                        return Err(StoreError::QueueFull { depth });
                    }
                    OverflowPolicy::EvictOldest => {
                        let excess = (depth + 1 - limit.max_depth) as i64;
                        let evicted = tx.execute(
                            "DELETE FROM pending_messages WHERE id IN (
                                 SELECT id FROM pending_messages
                                 WHERE user_id = ?1 AND expires_at > ?3
                                 ORDER BY created_at ASC, id ASC
                                 LIMIT ?2
                             )",
                            params![user_id.as_str(), excess, fmt_ts(&now)],
                        )?;
                        tracing::warn!(
                            user = %user_id,
                            evicted,
                            max_depth = limit.max_depth,
                            "pending queue full, evicted oldest entries"
                        );
                    }
                }
            }
        }

        tx.execute(
            "INSERT INTO pending_messages (user_id, room_id, payload, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id.as_str(),
                room_id.as_str(),
                body,
                fmt_ts(&now),
                fmt_ts(&(now + Duration::seconds(PENDING_TTL_SECS))),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(id)
    }

    /// Every unexpired entry for the user, oldest first.
    pub fn pending_for_user(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {PENDING_COLUMNS} FROM pending_messages
             WHERE user_id = ?1 AND expires_at > ?2
             ORDER BY created_at ASC, id ASC"
        ))?;

        let rows = stmt.query_map(params![user_id.as_str(), fmt_ts(&now)], row_to_pending)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Unexpired entries for the user in one room, oldest first.
    pub fn pending_for_room(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {PENDING_COLUMNS} FROM pending_messages
             WHERE user_id = ?1 AND room_id = ?2 AND expires_at > ?3
             ORDER BY created_at ASC, id ASC"
        ))?;

        let rows = stmt.query_map(
            params![user_id.as_str(), room_id.as_str(), fmt_ts(&now)],
            row_to_pending,
        )?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Remove delivered entries by id. Ids owned by another user are ignored.
    pub fn delete_pending(&self, user_id: &UserId, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let tx = self.conn().unchecked_transaction()?;
        let mut removed = 0;
        {
            let mut stmt =
                tx.prepare("DELETE FROM pending_messages WHERE id = ?1 AND user_id = ?2")?;
            for id in ids {
                removed += stmt.execute(params![id, user_id.as_str()])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Drop the user's whole queue.
    pub fn clear_pending(&self, user_id: &UserId) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM pending_messages WHERE user_id = ?1",
            params![user_id.as_str()],
        )?;
        Ok(removed)
    }

    /// Drop the user's queued entries for one room.
    pub fn clear_pending_for_room(&self, user_id: &UserId, room_id: &RoomId) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM pending_messages WHERE user_id = ?1 AND room_id = ?2",
            params![user_id.as_str(), room_id.as_str()],
        )?;
        Ok(removed)
    }

    pub fn purge_expired_pending(&self, now: DateTime<Utc>) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM pending_messages WHERE expires_at <= ?1",
            params![fmt_ts(&now)],
        )?;
        Ok(removed)
    }
}

fn row_to_pending(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingMessage> {
    let payload_str: String = row.get(3)?;
    let created_str: String = row.get(4)?;
    let expires_str: String = row.get(5)?;

    let payload: ChatMessage =
        serde_json::from_str(&payload_str).map_err(|e| conversion_err(3, e))?;

    Ok(PendingMessage {
        id: row.get(0)?,
        user_id: UserId(row.get(1)?),
        room_id: RoomId(row.get(2)?),
        payload,
        created_at: parse_ts(4, &created_str)?,
        expires_at: parse_ts(5, &expires_str)?,
    })
}

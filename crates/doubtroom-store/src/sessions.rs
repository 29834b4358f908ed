//! Presence sessions.
//!
//! One row per user. An upsert always refreshes `last_activity` and pushes
//! `expires_at` to `now + SESSION_TTL_SECS`; the newest connection id wins.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};

use doubtroom_shared::constants::SESSION_TTL_SECS;
use doubtroom_shared::types::{PresenceStatus, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::{conversion_err, fmt_ts, parse_ts, Session, SessionUpdate};
use crate::profiles::mirror_presence;

const SESSION_COLUMNS: &str =
    "user_id, connection_id, status, role, connected_at, last_activity, expires_at";

impl Database {
    /// Insert or overwrite the session for `user_id` and mirror the new
    /// status onto the user's profile record, if one exists.
    ///
    /// `connected_at` only moves when the connection id changes.
    pub fn upsert_session(
        &self,
        user_id: &UserId,
        update: &SessionUpdate,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let tx = self.conn().unchecked_transaction()?;
        let now_s = fmt_ts(&now);
        let expires = fmt_ts(&(now + Duration::seconds(SESSION_TTL_SECS)));

        tx.execute(
            "INSERT INTO sessions (user_id, connection_id, status, role, connected_at, last_activity, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                 connected_at = CASE
                     WHEN sessions.connection_id = excluded.connection_id
                          AND sessions.expires_at > excluded.last_activity
                     THEN sessions.connected_at
                     ELSE excluded.connected_at
                 END,
                 connection_id = excluded.connection_id,
                 status = excluded.status,
                 role = COALESCE(excluded.role, sessions.role),
                 last_activity = excluded.last_activity,
                 expires_at = excluded.expires_at",
            params![
                user_id.as_str(),
                update.connection_id,
                update.status.as_str(),
                update.role.map(|r| r.as_str()),
                now_s,
                expires,
            ],
        )?;

        mirror_presence(&tx, user_id, update.status, Some(&update.connection_id))?;

        let session = tx.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = ?1"),
            params![user_id.as_str()],
            row_to_session,
        )?;
        tx.commit()?;

        Ok(session)
    }

    /// Push the session's expiry forward on activity from `update.connection_id`.
    ///
    /// Status and role are kept when the row is bound to that connection. A
    /// missing or expired row is recreated from `update`; a live row owned by
    /// another connection is left alone and `false` is returned.
    pub fn touch_session(
        &self,
        user_id: &UserId,
        update: &SessionUpdate,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let tx = self.conn().unchecked_transaction()?;
        let now_s = fmt_ts(&now);
        let expires = fmt_ts(&(now + Duration::seconds(SESSION_TTL_SECS)));

        let refreshed = tx.execute(
            "UPDATE sessions SET last_activity = ?3, expires_at = ?4
             WHERE user_id = ?1 AND connection_id = ?2 AND expires_at > ?3",
            params![user_id.as_str(), update.connection_id, now_s, expires],
        )?;
        if refreshed > 0 {
            tx.commit()?;
            return Ok(true);
        }

        let reclaimed = tx.execute(
            "INSERT INTO sessions (user_id, connection_id, status, role, connected_at, last_activity, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                 connection_id = excluded.connection_id,
                 status = excluded.status,
                 role = COALESCE(excluded.role, sessions.role),
                 connected_at = excluded.connected_at,
                 last_activity = excluded.last_activity,
                 expires_at = excluded.expires_at
             WHERE sessions.expires_at <= excluded.last_activity",
            params![
                user_id.as_str(),
                update.connection_id,
                update.status.as_str(),
                update.role.map(|r| r.as_str()),
                now_s,
                expires,
            ],
        )?;
        if reclaimed > 0 {
            mirror_presence(&tx, user_id, update.status, Some(&update.connection_id))?;
        }
        tx.commit()?;

        Ok(reclaimed > 0)
    }

    /// Current, unexpired session for a user.
    pub fn get_session(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<Option<Session>> {
        let session = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE user_id = ?1 AND expires_at > ?2"
                ),
                params![user_id.as_str(), fmt_ts(&now)],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    /// Reverse lookup: which user does this connection currently belong to.
    pub fn user_by_connection(
        &self,
        connection_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<UserId>> {
        let user = self
            .conn()
            .query_row(
                "SELECT user_id FROM sessions
                 WHERE connection_id = ?1 AND expires_at > ?2
                 ORDER BY last_activity DESC
                 LIMIT 1",
                params![connection_id, fmt_ts(&now)],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(user.map(UserId))
    }

    /// All unexpired sessions whose status is `online`.
    pub fn list_online(&self, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE status = 'online' AND expires_at > ?1
             ORDER BY last_activity DESC"
        ))?;

        let rows = stmt.query_map(params![fmt_ts(&now)], row_to_session)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    /// Flip a session to offline, but only while it is still bound to
    /// `connection_id`. Returns `false` when a newer connection owns the
    /// session (or none exists), in which case nothing changes.
    pub fn mark_offline(
        &self,
        user_id: &UserId,
        connection_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let tx = self.conn().unchecked_transaction()?;

        let affected = tx.execute(
            "UPDATE sessions
             SET status = 'offline', last_activity = ?3, expires_at = ?4
             WHERE user_id = ?1 AND connection_id = ?2",
            params![
                user_id.as_str(),
                connection_id,
                fmt_ts(&now),
                fmt_ts(&(now + Duration::seconds(SESSION_TTL_SECS))),
            ],
        )?;

        if affected > 0 {
            mirror_presence(&tx, user_id, PresenceStatus::Offline, Some(connection_id))?;
        }
        tx.commit()?;

        Ok(affected > 0)
    }

    /// Delete sessions whose TTL has elapsed. Returns the number removed.
    pub fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM sessions WHERE expires_at <= ?1",
            params![fmt_ts(&now)],
        )?;
        Ok(removed)
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let user_id: String = row.get(0)?;
    let connection_id: String = row.get(1)?;
    let status_str: String = row.get(2)?;
    let role_str: Option<String> = row.get(3)?;
    let connected_str: String = row.get(4)?;
    let activity_str: String = row.get(5)?;
    let expires_str: String = row.get(6)?;

    let status = status_str
        .parse::<PresenceStatus>()
        .map_err(|e| conversion_err(2, e))?;
    let role = role_str
        .map(|r| r.parse())
        .transpose()
        .map_err(|e| conversion_err(3, e))?;

    Ok(Session {
        user_id: UserId(user_id),
        connection_id,
        status,
        role,
        connected_at: parse_ts(4, &connected_str)?,
        last_activity: parse_ts(5, &activity_str)?,
        expires_at: parse_ts(6, &expires_str)?,
    })
}

//! v001 -- Chat core schema.
//!
//! Creates the three shared-state tables of the real-time core: `sessions`,
//! `pending_messages` and `typing_status`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Presence sessions (one per user)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS sessions (
    user_id       TEXT PRIMARY KEY NOT NULL,
    connection_id TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'online',  -- online | offline | away | busy
    role          TEXT,                            -- Student | Teacher
    connected_at  TEXT NOT NULL,                   -- RFC-3339, fixed width
    last_activity TEXT NOT NULL,
    expires_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_connection ON sessions(connection_id);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status, expires_at);

-- ----------------------------------------------------------------
-- Pending (undelivered) messages, owned by the recipient
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS pending_messages (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id    TEXT NOT NULL,
    room_id    TEXT NOT NULL,
    payload    TEXT NOT NULL,                      -- JSON ChatMessage
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_user ON pending_messages(user_id, created_at, id);
CREATE INDEX IF NOT EXISTS idx_pending_user_room ON pending_messages(user_id, room_id);

-- ----------------------------------------------------------------
-- Typing indicators, one per (room, user)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS typing_status (
    room_id    TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    is_typing  INTEGER NOT NULL DEFAULT 1,         -- boolean 0/1
    started_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,

    PRIMARY KEY (room_id, user_id)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

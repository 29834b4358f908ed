use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Doubts anchor room membership: one student, one teacher, one room
CREATE TABLE IF NOT EXISTS doubts (
    id          TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    title       TEXT NOT NULL,
    description TEXT NOT NULL,
    student_id  TEXT NOT NULL,
    teacher_id  TEXT NOT NULL,
    room_id     TEXT NOT NULL UNIQUE,
    status      TEXT NOT NULL DEFAULT 'unresolved',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_doubts_student ON doubts(student_id);
CREATE INDEX IF NOT EXISTS idx_doubts_teacher ON doubts(teacher_id);

-- Profile records carry a denormalized copy of presence
CREATE TABLE IF NOT EXISTS students (
    id            TEXT PRIMARY KEY NOT NULL,
    full_name     TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'offline',
    connection_id TEXT
);

CREATE TABLE IF NOT EXISTS teachers (
    id            TEXT PRIMARY KEY NOT NULL,
    full_name     TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'offline',
    connection_id TEXT
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

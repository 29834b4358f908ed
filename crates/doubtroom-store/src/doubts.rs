//! CRUD operations for [`Doubt`] records.
//!
//! The chat core only reads doubts (membership checks); creation and status
//! changes come from the REST bridge.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use doubtroom_shared::types::{DoubtStatus, RoomId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{conversion_err, fmt_ts, parse_ts, Doubt};

const DOUBT_COLUMNS: &str =
    "id, title, description, student_id, teacher_id, room_id, status, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new doubt. Fails if the room id is already taken.
    pub fn insert_doubt(&self, doubt: &Doubt) -> Result<()> {
        self.conn().execute(
            "INSERT INTO doubts (id, title, description, student_id, teacher_id, room_id, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                doubt.id.to_string(),
                doubt.title,
                doubt.description,
                doubt.student_id.as_str(),
                doubt.teacher_id.as_str(),
                doubt.room_id.as_str(),
                doubt.status.as_str(),
                fmt_ts(&doubt.created_at),
                fmt_ts(&doubt.updated_at),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch the doubt anchoring a room.
    pub fn get_doubt_by_room(&self, room_id: &RoomId) -> Result<Doubt> {
        self.conn()
            .query_row(
                &format!("SELECT {DOUBT_COLUMNS} FROM doubts WHERE room_id = ?1"),
                params![room_id.as_str()],
                row_to_doubt,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Doubts where the user is the student or the teacher, newest first.
    pub fn list_doubts_for_user(&self, user_id: &UserId) -> Result<Vec<Doubt>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {DOUBT_COLUMNS} FROM doubts
             WHERE student_id = ?1 OR teacher_id = ?1
             ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(params![user_id.as_str()], row_to_doubt)?;

        let mut doubts = Vec::new();
        for row in rows {
            doubts.push(row?);
        }
        Ok(doubts)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Set the resolution status of the doubt behind `room_id` and return the
    /// updated record.
    pub fn update_doubt_status(
        &self,
        room_id: &RoomId,
        status: DoubtStatus,
        now: DateTime<Utc>,
    ) -> Result<Doubt> {
        let affected = self.conn().execute(
            "UPDATE doubts SET status = ?2, updated_at = ?3 WHERE room_id = ?1",
            params![room_id.as_str(), status.as_str(), fmt_ts(&now)],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_doubt_by_room(room_id)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_doubt(row: &rusqlite::Row<'_>) -> rusqlite::Result<Doubt> {
    let id_str: String = row.get(0)?;
    let status_str: String = row.get(6)?;
    let created_str: String = row.get(7)?;
    let updated_str: String = row.get(8)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| conversion_err(0, e))?;
    let status = status_str
        .parse::<DoubtStatus>()
        .map_err(|e| conversion_err(6, e))?;

    Ok(Doubt {
        id,
        title: row.get(1)?,
        description: row.get(2)?,
        student_id: UserId(row.get(3)?),
        teacher_id: UserId(row.get(4)?),
        room_id: RoomId(row.get(5)?),
        status,
        created_at: parse_ts(7, &created_str)?,
        updated_at: parse_ts(8, &updated_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(room: &str) -> Doubt {
        let now = Utc::now();
        Doubt {
            id: Uuid::new_v4(),
            title: "Recursion".into(),
            description: "How does the call stack unwind?".into(),
            student_id: UserId::new("s1"),
            teacher_id: UserId::new("t1"),
            room_id: RoomId::new(room),
            status: DoubtStatus::Unresolved,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn insert_and_fetch_by_room() {
        let db = Database::open_in_memory().unwrap();
        let doubt = sample("room-1");
        db.insert_doubt(&doubt).unwrap();

        let fetched = db.get_doubt_by_room(&RoomId::new("room-1")).unwrap();
        assert_eq!(fetched.id, doubt.id);
        assert_eq!(fetched.teacher_id, UserId::new("t1"));
    }

    #[test]
    fn unknown_room_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_doubt_by_room(&RoomId::new("missing")),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn room_id_is_unique() {
        let db = Database::open_in_memory().unwrap();
        db.insert_doubt(&sample("room-1")).unwrap();
        assert!(db.insert_doubt(&sample("room-1")).is_err());
    }

    #[test]
    fn status_update_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.insert_doubt(&sample("room-1")).unwrap();

        let updated = db
            .update_doubt_status(&RoomId::new("room-1"), DoubtStatus::Resolved, Utc::now())
            .unwrap();
        assert_eq!(updated.status, DoubtStatus::Resolved);

        assert!(matches!(
            db.update_doubt_status(&RoomId::new("nope"), DoubtStatus::Resolved, Utc::now()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn list_for_user_matches_either_side() {
        let db = Database::open_in_memory().unwrap();
        db.insert_doubt(&sample("room-1")).unwrap();
        db.insert_doubt(&sample("room-2")).unwrap();

        assert_eq!(db.list_doubts_for_user(&UserId::new("s1")).unwrap().len(), 2);
        assert_eq!(db.list_doubts_for_user(&UserId::new("t1")).unwrap().len(), 2);
        assert!(db.list_doubts_for_user(&UserId::new("x")).unwrap().is_empty());
    }
}

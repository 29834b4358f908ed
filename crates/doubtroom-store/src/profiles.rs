//! Student and teacher profiles.
//!
//! Only the presence columns matter to the chat core: every session write
//! copies `status` and `connection_id` here so profile reads can embed
//! presence without a second lookup.

use rusqlite::{params, Connection, OptionalExtension};

use doubtroom_shared::types::{PresenceStatus, Role, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{conversion_err, Profile};

fn table_for(role: Role) -> &'static str {
    match role {
        Role::Student => "students",
        Role::Teacher => "teachers",
    }
}

impl Database {
    /// Insert or replace a profile in the table matching its role.
    pub fn insert_profile(&self, profile: &Profile) -> Result<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO {} (id, full_name, status, connection_id)
             VALUES (?1, ?2, ?3, ?4)",
            table_for(profile.role)
        );
        self.conn().execute(
            &sql,
            params![
                profile.id.as_str(),
                profile.full_name,
                profile.status.as_str(),
                profile.connection_id,
            ],
        )?;
        Ok(())
    }

    /// Look the user up as a student first, then as a teacher.
    pub fn get_profile(&self, id: &UserId) -> Result<Profile> {
        for role in [Role::Student, Role::Teacher] {
            let sql = format!(
                "SELECT id, full_name, status, connection_id FROM {} WHERE id = ?1",
                table_for(role)
            );
            let found = self
                .conn()
                .query_row(&sql, params![id.as_str()], |row| {
                    let status: String = row.get(2)?;
                    Ok(Profile {
                        id: UserId(row.get(0)?),
                        full_name: row.get(1)?,
                        role,
                        status: status.parse().map_err(|e| conversion_err(2, e))?,
                        connection_id: row.get(3)?,
                    })
                })
                .optional()?;
            if let Some(profile) = found {
                return Ok(profile);
            }
        }
        Err(StoreError::NotFound)
    }
}

/// Copy presence onto the student profile, or else the teacher profile.
/// A user with neither profile is silently skipped.
pub(crate) fn mirror_presence(
    conn: &Connection,
    user_id: &UserId,
    status: PresenceStatus,
    connection_id: Option<&str>,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE students SET status = ?2, connection_id = ?3 WHERE id = ?1",
        params![user_id.as_str(), status.as_str(), connection_id],
    )?;
    if updated == 0 {
        conn.execute(
            "UPDATE teachers SET status = ?2, connection_id = ?3 WHERE id = ?1",
            params![user_id.as_str(), status.as_str(), connection_id],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_lookup_spans_both_tables() {
        let db = Database::open_in_memory().unwrap();
        db.insert_profile(&Profile {
            id: UserId::new("s1"),
            full_name: "Sam".into(),
            role: Role::Student,
            status: PresenceStatus::Offline,
            connection_id: None,
        })
        .unwrap();
        db.insert_profile(&Profile {
            id: UserId::new("t1"),
            full_name: "Tess".into(),
            role: Role::Teacher,
            status: PresenceStatus::Offline,
            connection_id: None,
        })
        .unwrap();

        assert_eq!(db.get_profile(&UserId::new("s1")).unwrap().role, Role::Student);
        assert_eq!(db.get_profile(&UserId::new("t1")).unwrap().role, Role::Teacher);
        assert!(matches!(
            db.get_profile(&UserId::new("nobody")),
            Err(StoreError::NotFound)
        ));
    }
}

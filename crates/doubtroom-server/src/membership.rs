//! Room membership derived from the doubt that anchors each room.

use doubtroom_shared::types::{Role, RoomId, UserId};
use doubtroom_store::Doubt;

use crate::error::ChatError;
use crate::store::StoreHandle;

#[derive(Clone)]
pub struct MembershipAuthority {
    store: StoreHandle,
}

impl MembershipAuthority {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    pub async fn doubt_for_room(&self, room_id: &RoomId) -> Result<Doubt, ChatError> {
        let room = room_id.clone();
        match self.store.call(move |db| db.get_doubt_by_room(&room)).await {
            Err(ChatError::NotFound) => Err(ChatError::RoomNotFound(room_id.clone())),
            other => other,
        }
    }

    /// Whether `user_id` holds the `role` side of the room's doubt.
    ///
    /// An unknown room yields [`ChatError::RoomNotFound`]; callers treat it as
    /// a denial.
    pub async fn is_member(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        role: Role,
    ) -> Result<bool, ChatError> {
        let doubt = self.doubt_for_room(room_id).await?;
        Ok(doubt.is_member(user_id, role))
    }

    /// The other participant of the room, as seen from `role`.
    pub async fn counterpart(&self, room_id: &RoomId, role: Role) -> Result<UserId, ChatError> {
        let doubt = self.doubt_for_room(room_id).await?;
        Ok(doubt.counterpart(role).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use doubtroom_shared::types::DoubtStatus;
    use doubtroom_store::Database;
    use uuid::Uuid;

    fn authority() -> MembershipAuthority {
        let db = Database::open_in_memory().unwrap();
        db.insert_doubt(&Doubt {
            id: Uuid::new_v4(),
            title: "Limits".into(),
            description: "Epsilon-delta".into(),
            student_id: UserId::new("s1"),
            teacher_id: UserId::new("t1"),
            room_id: RoomId::new("r1"),
            status: DoubtStatus::Unresolved,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .unwrap();
        MembershipAuthority::new(StoreHandle::new(db))
    }

    #[tokio::test]
    async fn members_by_role() {
        let auth = authority();
        let room = RoomId::new("r1");
        assert!(auth.is_member(&room, &UserId::new("s1"), Role::Student).await.unwrap());
        assert!(auth.is_member(&room, &UserId::new("t1"), Role::Teacher).await.unwrap());
        assert!(!auth.is_member(&room, &UserId::new("t1"), Role::Student).await.unwrap());
        assert!(!auth.is_member(&room, &UserId::new("x"), Role::Student).await.unwrap());
    }

    #[tokio::test]
    async fn counterpart_is_the_other_side() {
        let auth = authority();
        let room = RoomId::new("r1");
        assert_eq!(auth.counterpart(&room, Role::Student).await.unwrap(), UserId::new("t1"));
        assert_eq!(auth.counterpart(&room, Role::Teacher).await.unwrap(), UserId::new("s1"));
    }

    #[tokio::test]
    async fn unknown_room_is_reported() {
        let auth = authority();
        let result = auth
            .is_member(&RoomId::new("nope"), &UserId::new("s1"), Role::Student)
            .await;
        assert!(matches!(result, Err(ChatError::RoomNotFound(_))));
    }
}

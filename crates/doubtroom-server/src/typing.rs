use chrono::Utc;

use doubtroom_shared::types::{RoomId, UserId};
use doubtroom_store::TypingStatus;

use crate::error::ChatError;
use crate::store::StoreHandle;

/// Advisory typing indicators. Reads may lag the true TTL slightly.
#[derive(Clone)]
pub struct TypingIndicators {
    store: StoreHandle,
}

impl TypingIndicators {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    pub async fn set(&self, room_id: &RoomId, user_id: &UserId) -> Result<(), ChatError> {
        let (room, user) = (room_id.clone(), user_id.clone());
        self.store
            .call(move |db| db.set_typing(&room, &user, Utc::now()))
            .await
    }

    pub async fn list(&self, room_id: &RoomId) -> Result<Vec<TypingStatus>, ChatError> {
        let room = room_id.clone();
        self.store
            .call(move |db| db.list_typing(&room, Utc::now()))
            .await
    }

    pub async fn clear(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool, ChatError> {
        let (room, user) = (room_id.clone(), user_id.clone());
        self.store.call(move |db| db.clear_typing(&room, &user)).await
    }
}

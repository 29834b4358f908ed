//! Pending-message queue for recipients who were not live at send time.

use chrono::Utc;
use tracing::{debug, info};

use doubtroom_shared::protocol::ChatMessage;
use doubtroom_shared::types::{RoomId, UserId};
use doubtroom_store::{PendingMessage, QueueLimit};

use crate::error::ChatError;
use crate::store::StoreHandle;

#[derive(Clone)]
pub struct PendingQueue {
    store: StoreHandle,
    limit: QueueLimit,
}

impl PendingQueue {
    pub fn new(store: StoreHandle, limit: QueueLimit) -> Self {
        Self { store, limit }
    }

    pub async fn enqueue(
        &self,
        recipient: &UserId,
        room_id: &RoomId,
        message: ChatMessage,
    ) -> Result<i64, ChatError> {
        let (user, room, limit) = (recipient.clone(), room_id.clone(), self.limit);
        let entry = self
            .store
            .call(move |db| db.enqueue_pending(&user, &room, &message, Utc::now(), limit))
            .await?;
        debug!(user = %recipient, room = %room_id, entry, "Message queued");
        Ok(entry)
    }

    /// Entries for the user in FIFO order. Nothing is removed.
    pub async fn list(&self, recipient: &UserId) -> Result<Vec<PendingMessage>, ChatError> {
        let user = recipient.clone();
        self.store
            .call(move |db| db.pending_for_user(&user, Utc::now()))
            .await
    }

    pub async fn list_for_room(
        &self,
        recipient: &UserId,
        room_id: &RoomId,
    ) -> Result<Vec<PendingMessage>, ChatError> {
        let (user, room) = (recipient.clone(), room_id.clone());
        self.store
            .call(move |db| db.pending_for_room(&user, &room, Utc::now()))
            .await
    }

    /// Remove entries that were handed to the recipient.
    pub async fn acknowledge(&self, recipient: &UserId, ids: Vec<i64>) -> Result<usize, ChatError> {
        let user = recipient.clone();
        self.store
            .call(move |db| db.delete_pending(&user, &ids))
            .await
    }

    pub async fn clear(&self, recipient: &UserId) -> Result<usize, ChatError> {
        let user = recipient.clone();
        let removed = self.store.call(move |db| db.clear_pending(&user)).await?;
        info!(user = %recipient, removed, "Pending queue cleared");
        Ok(removed)
    }

    pub async fn clear_for_room(
        &self,
        recipient: &UserId,
        room_id: &RoomId,
    ) -> Result<usize, ChatError> {
        let (user, room) = (recipient.clone(), room_id.clone());
        let removed = self
            .store
            .call(move |db| db.clear_pending_for_room(&user, &room))
            .await?;
        info!(user = %recipient, room = %room_id, removed, "Pending queue cleared for room");
        Ok(removed)
    }
}

//! Session registry: who is connected where, and with what status.

use chrono::Utc;
use tracing::debug;

use doubtroom_shared::types::{ConnectionId, PresenceStatus, Role, UserId};
use doubtroom_store::{Session, SessionUpdate};

use crate::error::ChatError;
use crate::store::StoreHandle;

#[derive(Clone)]
pub struct SessionRegistry {
    store: StoreHandle,
}

impl SessionRegistry {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Upsert the user's session. The latest connection id wins and the TTL
    /// restarts.
    pub async fn set_session(
        &self,
        user_id: &UserId,
        connection_id: ConnectionId,
        status: PresenceStatus,
        role: Option<Role>,
    ) -> Result<Session, ChatError> {
        let user = user_id.clone();
        let update = SessionUpdate {
            connection_id: connection_id.to_string(),
            status,
            role,
        };
        let session = self
            .store
            .call(move |db| db.upsert_session(&user, &update, Utc::now()))
            .await?;
        debug!(user = %user_id, conn = %connection_id, status = status.as_str(), "Session updated");
        Ok(session)
    }

    /// Extend the TTL for activity on `connection_id`. Returns `false` when
    /// a newer connection owns the session.
    pub async fn touch(
        &self,
        user_id: &UserId,
        connection_id: ConnectionId,
        role: Role,
    ) -> Result<bool, ChatError> {
        let user = user_id.clone();
        let update = SessionUpdate {
            connection_id: connection_id.to_string(),
            status: PresenceStatus::Online,
            role: Some(role),
        };
        self.store
            .call(move |db| db.touch_session(&user, &update, Utc::now()))
            .await
    }

    pub async fn get_session(&self, user_id: &UserId) -> Result<Option<Session>, ChatError> {
        let user = user_id.clone();
        self.store
            .call(move |db| db.get_session(&user, Utc::now()))
            .await
    }

    pub async fn is_online(&self, user_id: &UserId) -> Result<bool, ChatError> {
        Ok(self
            .get_session(user_id)
            .await?
            .is_some_and(|s| s.is_online()))
    }

    pub async fn user_by_connection(
        &self,
        connection_id: &str,
    ) -> Result<Option<UserId>, ChatError> {
        let conn = connection_id.to_string();
        self.store
            .call(move |db| db.user_by_connection(&conn, Utc::now()))
            .await
    }

    pub async fn list_online(&self) -> Result<Vec<Session>, ChatError> {
        self.store.call(|db| db.list_online(Utc::now())).await
    }

    /// Flip the session offline if `connection_id` still owns it.
    pub async fn mark_offline(
        &self,
        user_id: &UserId,
        connection_id: ConnectionId,
    ) -> Result<bool, ChatError> {
        let user = user_id.clone();
        self.store
            .call(move |db| db.mark_offline(&user, &connection_id.to_string(), Utc::now()))
            .await
    }
}

//! Message router: the operations behind every inbound real-time event.
//!
//! Each operation works on the caller's [`Connection`] and the shared
//! components (session registry, pending queue, typing indicators,
//! membership authority and the broadcast [`Hub`]). Cross-connection state is
//! only ever touched through those components, whose writes are atomic at the
//! storage layer.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use doubtroom_shared::constants::MAX_ATTACHMENTS;
use doubtroom_shared::protocol::{
    outbound, Attachment, ChatMessage, DeliveryStatus, JoinRoomRequest, SendMessageRequest,
    ServerFrame, TypingStatusRequest, UserTyping,
};
use doubtroom_shared::types::{ConnectionId, PresenceStatus, RoomId};
use doubtroom_store::QueueLimit;

use crate::cipher::MessageCipher;
use crate::connection::{Connection, Identity};
use crate::error::ChatError;
use crate::files::FileStorage;
use crate::hub::Hub;
use crate::membership::MembershipAuthority;
use crate::pending::PendingQueue;
use crate::presence::SessionRegistry;
use crate::store::StoreHandle;
use crate::typing::TypingIndicators;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined(RoomId),
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Broadcast to the room; carries the message id.
    Delivered(Uuid),
    /// Parked in the recipient's pending queue.
    Queued(Uuid),
}

#[derive(Clone)]
pub struct ChatRouter {
    sessions: SessionRegistry,
    pending: PendingQueue,
    typing: TypingIndicators,
    membership: MembershipAuthority,
    hub: Hub,
    cipher: Arc<dyn MessageCipher>,
    files: Arc<dyn FileStorage>,
}

impl ChatRouter {
    pub fn new(
        store: StoreHandle,
        hub: Hub,
        cipher: Arc<dyn MessageCipher>,
        files: Arc<dyn FileStorage>,
        limit: QueueLimit,
    ) -> Self {
        Self {
            sessions: SessionRegistry::new(store.clone()),
            pending: PendingQueue::new(store.clone(), limit),
            typing: TypingIndicators::new(store.clone()),
            membership: MembershipAuthority::new(store),
            hub,
            cipher,
            files,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    pub fn typing(&self) -> &TypingIndicators {
        &self.typing
    }

    pub fn membership(&self) -> &MembershipAuthority {
        &self.membership
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Bind an authenticated connection: register it with the hub and record
    /// an online session. Returns the connection and its outbound receiver.
    pub async fn open_connection(
        &self,
        identity: Identity,
    ) -> Result<(Connection, mpsc::Receiver<ServerFrame>), ChatError> {
        let id = ConnectionId::new();
        let rx = self.hub.register(id, Some(identity.user_id.clone())).await;

        if let Err(e) = self
            .sessions
            .set_session(&identity.user_id, id, PresenceStatus::Online, Some(identity.role))
            .await
        {
            self.hub.unregister(id).await;
            return Err(e);
        }

        info!(user = %identity.user_id, role = identity.role.as_str(), conn = %id, "Connection authenticated");
        Ok((Connection::authenticated(id, identity), rx))
    }

    /// Join the room of a doubt the caller belongs to.
    ///
    /// A denied join leaves the connection exactly as it was.
    pub async fn join_room(
        &self,
        conn: &mut Connection,
        req: JoinRoomRequest,
    ) -> Result<JoinOutcome, ChatError> {
        let identity = conn.require_identity()?.clone();
        let room_id = req.room_id;

        if req.user_id != identity.user_id {
            warn!(conn = %conn.id(), claimed = %req.user_id, user = %identity.user_id, "Join with foreign userId");
            return Ok(JoinOutcome::Denied);
        }
        if let Some(hint) = req.user_type.as_deref() {
            if !hint.eq_ignore_ascii_case(identity.role.user_type()) {
                warn!(conn = %conn.id(), hint, role = identity.role.as_str(), "Join with mismatched userType");
                return Ok(JoinOutcome::Denied);
            }
        }

        match self
            .membership
            .is_member(&room_id, &identity.user_id, identity.role)
            .await
        {
            Ok(true) => {}
            Ok(false) | Err(ChatError::RoomNotFound(_)) => {
                info!(user = %identity.user_id, room = %room_id, "Join denied");
                return Ok(JoinOutcome::Denied);
            }
            Err(e) => return Err(e),
        }

        self.hub.leave_all(conn.id()).await;
        conn.leave_room();
        self.hub.join(conn.id(), &room_id).await;
        conn.enter_room(room_id.clone(), req.doubt_status.unwrap_or_default())?;

        self.sessions
            .set_session(&identity.user_id, conn.id(), PresenceStatus::Online, None)
            .await?;

        Ok(JoinOutcome::Joined(room_id))
    }

    /// Encrypt, attach, then broadcast live or queue for the recipient.
    pub async fn send_message(
        &self,
        conn: &Connection,
        req: SendMessageRequest,
    ) -> Result<SendOutcome, ChatError> {
        let identity = conn.require_identity()?;
        if req.sender_id != identity.user_id || req.sender_model != identity.role {
            return Err(ChatError::ValidationFailed(
                "senderId and senderModel must match the connected user".into(),
            ));
        }
        if !conn.is_in_room(&req.room_id) {
            return Err(ChatError::NotAMember(req.room_id));
        }
        if req.files.len() > MAX_ATTACHMENTS {
            return Err(ChatError::ValidationFailed(format!(
                "At most {MAX_ATTACHMENTS} files per message"
            )));
        }
        if let Some(recipient) = &req.recipient_id {
            let expected = self
                .membership
                .counterpart(&req.room_id, identity.role)
                .await?;
            if *recipient != expected {
                warn!(user = %identity.user_id, room = %req.room_id, recipient = %recipient, "Recipient outside the room");
                return Err(ChatError::ValidationFailed(
                    "recipientId must be the other participant of this room".into(),
                ));
            }
        }

        let content = match req.text.as_deref().filter(|t| !t.is_empty()) {
            Some(text) => Some(self.cipher.encrypt(text).map_err(|e| {
                error!(user = %identity.user_id, room = %req.room_id, error = %e, "Encryption failed");
                ChatError::EncryptionFailure(e)
            })?),
            None => None,
        };

        let mut files = Vec::with_capacity(req.files.len());
        for upload in &req.files {
            let file_id = self.files.upload(upload).await.map_err(|e| {
                warn!(user = %identity.user_id, room = %req.room_id, error = %e, "Attachment upload failed");
                e
            })?;
            files.push(Attachment {
                url: self.files.link(&file_id),
                file_id,
                mime_type: upload.mime_type.clone(),
                name: upload.name.clone(),
            });
        }

        let live = match &req.recipient_id {
            Some(recipient) => self.sessions.is_online(recipient).await?,
            None => self.hub.has_other_member(&req.room_id, conn.id()).await,
        };

        let message = ChatMessage {
            id: Uuid::new_v4(),
            room_id: req.room_id.clone(),
            sender_id: req.sender_id,
            sender_model: req.sender_model,
            recipient_id: req.recipient_id.clone(),
            content,
            files,
            created_at: Utc::now(),
            status: DeliveryStatus::Sent,
        };
        let message_id = message.id;

        if live {
            let frame = ServerFrame::typed(outbound::NEW_MESSAGE, &message)?;
            let fanout = self.hub.broadcast_tracked(&req.room_id, frame).await;
            for user in fanout.dropped.iter().filter(|u| **u != identity.user_id) {
                // Clients dedupe by message id, so a user with another healthy
                // connection may see it twice.
                match self.pending.enqueue(user, &req.room_id, message.clone()).await {
                    Ok(_) => debug!(user = %user, message = %message_id, "Dropped frame parked in pending queue"),
                    Err(e) => warn!(user = %user, message = %message_id, error = %e, "Dropped frame lost"),
                }
            }
            info!(
                room = %req.room_id,
                message = %message_id,
                reached = fanout.delivered,
                parked = fanout.dropped.len(),
                "Message delivered"
            );
            return Ok(SendOutcome::Delivered(message_id));
        }

        let Some(recipient) = req.recipient_id else {
            return Err(ChatError::MissingRecipient);
        };
        self.pending.enqueue(&recipient, &req.room_id, message).await?;
        info!(room = %req.room_id, recipient = %recipient, message = %message_id, "Message queued");
        Ok(SendOutcome::Queued(message_id))
    }

    /// Extend the session TTL for inbound activity on an open connection.
    /// Failures are logged and otherwise ignored.
    pub async fn record_activity(&self, conn: &Connection) {
        let Ok(identity) = conn.require_identity() else {
            return;
        };
        match self
            .sessions
            .touch(&identity.user_id, conn.id(), identity.role)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(user = %identity.user_id, conn = %conn.id(), "Activity on superseded connection"),
            Err(e) => warn!(user = %identity.user_id, error = %e, "Session refresh failed"),
        }
    }

    /// Re-deliver the caller's queued messages to this connection and remove
    /// exactly the entries that were handed over.
    pub async fn check_missed_messages(&self, conn: &Connection) -> Result<usize, ChatError> {
        let identity = conn.require_identity()?;
        let entries = self.pending.list(&identity.user_id).await?;

        let mut delivered = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.user_id != identity.user_id {
                continue;
            }
            let frame = ServerFrame::typed(outbound::NEW_MESSAGE, &entry.payload)?;
            if !self.hub.emit_to(conn.id(), frame).await {
                warn!(conn = %conn.id(), "Connection closed during flush");
                break;
            }
            delivered.push(entry.id);
        }

        let count = delivered.len();
        if count > 0 {
            self.pending.acknowledge(&identity.user_id, delivered).await?;
        }
        info!(user = %identity.user_id, delivered = count, "Pending messages flushed");
        Ok(count)
    }

    /// Broadcast a typing indicator to the room and record it best effort.
    pub async fn typing_status(
        &self,
        conn: &Connection,
        req: TypingStatusRequest,
    ) -> Result<(), ChatError> {
        let identity = conn.require_identity()?;
        if req.user_id != identity.user_id {
            return Err(ChatError::ValidationFailed(
                "userId must match the connected user".into(),
            ));
        }
        if !conn.is_in_room(&req.room_id) {
            return Err(ChatError::NotAMember(req.room_id));
        }

        let frame = ServerFrame::typed(
            outbound::USER_TYPING,
            &UserTyping {
                user_id: req.user_id.clone(),
                status: req.status,
            },
        )?;
        self.hub.broadcast(&req.room_id, frame).await;

        let recorded = if req.status {
            self.typing.set(&req.room_id, &req.user_id).await
        } else {
            self.typing.clear(&req.room_id, &req.user_id).await.map(|_| ())
        };
        if let Err(e) = recorded {
            warn!(room = %req.room_id, user = %req.user_id, error = %e, "Typing indicator not recorded");
        }
        Ok(())
    }

    /// Tear down a connection. The session only goes offline while it is
    /// still bound to this connection.
    pub async fn disconnect(&self, conn: &mut Connection) {
        let closed = conn.close();
        self.hub.unregister(conn.id()).await;

        let Some((identity, room)) = closed else {
            return;
        };

        if let Some(room) = room {
            if let Err(e) = self.typing.clear(&room, &identity.user_id).await {
                debug!(room = %room, error = %e, "Typing indicator not cleared");
            }
        }

        match self.sessions.mark_offline(&identity.user_id, conn.id()).await {
            Ok(true) => info!(user = %identity.user_id, conn = %conn.id(), "User offline"),
            Ok(false) => {
                debug!(user = %identity.user_id, conn = %conn.id(), "Stale connection closed")
            }
            Err(e) => error!(user = %identity.user_id, error = %e, "Failed to mark session offline"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use doubtroom_shared::crypto::CipherBundle;
    use doubtroom_shared::error::CryptoError;
    use doubtroom_shared::protocol::FileUpload;
    use doubtroom_shared::types::{DoubtStatus, Role, UserId};
    use doubtroom_shared::constants::SESSION_TTL_SECS;
    use doubtroom_store::{Database, Doubt, OverflowPolicy, SessionUpdate};

    use crate::cipher::XChaChaCipher;

    /// Keeps uploads in memory; any file named `fail.*` is refused.
    #[derive(Default)]
    pub(crate) struct MemoryFiles {
        pub stored: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FileStorage for MemoryFiles {
        async fn upload(&self, file: &FileUpload) -> Result<String, ChatError> {
            if file.name.starts_with("fail") {
                return Err(ChatError::UploadFailure(file.name.clone()));
            }
            let id = format!("file-{}", Uuid::new_v4());
            self.stored.lock().unwrap().push(id.clone());
            Ok(id)
        }

        fn link(&self, file_id: &str) -> String {
            format!("http://files.test/{file_id}")
        }
    }

    struct BrokenCipher;

    impl MessageCipher for BrokenCipher {
        fn encrypt(&self, _: &str) -> Result<CipherBundle, CryptoError> {
            Err(CryptoError::EncryptionFailed)
        }

        fn decrypt(&self, _: &CipherBundle) -> Result<String, CryptoError> {
            Err(CryptoError::DecryptionFailed)
        }
    }

    fn doubt(room: &str, student: &str, teacher: &str) -> Doubt {
        Doubt {
            id: Uuid::new_v4(),
            title: "Recursion".into(),
            description: "Why does it terminate?".into(),
            student_id: UserId::new(student),
            teacher_id: UserId::new(teacher),
            room_id: RoomId::new(room),
            status: DoubtStatus::Unresolved,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn seeded_store() -> StoreHandle {
        let db = Database::open_in_memory().unwrap();
        db.insert_doubt(&doubt("r1", "s1", "t1")).unwrap();
        db.insert_doubt(&doubt("r2", "s2", "t1")).unwrap();
        StoreHandle::new(db)
    }

    pub(crate) fn router_with(cipher: Arc<dyn MessageCipher>, limit: QueueLimit) -> ChatRouter {
        ChatRouter::new(
            seeded_store(),
            Hub::new(),
            cipher,
            Arc::new(MemoryFiles::default()),
            limit,
        )
    }

    pub(crate) fn router_on(store: StoreHandle) -> ChatRouter {
        ChatRouter::new(
            store,
            Hub::new(),
            Arc::new(XChaChaCipher),
            Arc::new(MemoryFiles::default()),
            QueueLimit::unbounded(),
        )
    }

    /// Rewrite the connection's session as if it was last seen `age` ago.
    pub(crate) async fn age_session(store: &StoreHandle, conn: &Connection, age: chrono::Duration) {
        let identity = conn.require_identity().unwrap().clone();
        let update = SessionUpdate {
            connection_id: conn.id().to_string(),
            status: PresenceStatus::Online,
            role: Some(identity.role),
        };
        store
            .call(move |db| db.upsert_session(&identity.user_id, &update, Utc::now() - age))
            .await
            .unwrap();
    }

    pub(crate) fn router() -> ChatRouter {
        router_with(Arc::new(XChaChaCipher), QueueLimit::unbounded())
    }

    pub(crate) fn student(id: &str) -> Identity {
        Identity {
            user_id: UserId::new(id),
            role: Role::Student,
        }
    }

    pub(crate) fn teacher(id: &str) -> Identity {
        Identity {
            user_id: UserId::new(id),
            role: Role::Teacher,
        }
    }

    fn join_req(room: &str, user: &str) -> JoinRoomRequest {
        JoinRoomRequest {
            room_id: RoomId::new(room),
            user_id: UserId::new(user),
            user_type: None,
            doubt_status: None,
        }
    }

    fn send_req(room: &str, sender: &Identity, recipient: Option<&str>, text: &str) -> SendMessageRequest {
        SendMessageRequest {
            room_id: RoomId::new(room),
            sender_id: sender.user_id.clone(),
            sender_model: sender.role,
            recipient_id: recipient.map(UserId::new),
            text: Some(text.into()),
            files: Vec::new(),
        }
    }

    async fn joined(
        router: &ChatRouter,
        identity: Identity,
        room: &str,
    ) -> (Connection, mpsc::Receiver<ServerFrame>) {
        let user = identity.user_id.clone();
        let (mut conn, rx) = router.open_connection(identity).await.unwrap();
        let outcome = router
            .join_room(&mut conn, join_req(room, user.as_str()))
            .await
            .unwrap();
        assert_eq!(outcome, JoinOutcome::Joined(RoomId::new(room)));
        (conn, rx)
    }

    fn message_of(frame: ServerFrame) -> ChatMessage {
        assert_eq!(frame.event, outbound::NEW_MESSAGE);
        serde_json::from_value(frame.data).unwrap()
    }

    #[tokio::test]
    async fn live_recipient_gets_encrypted_message() {
        let router = router();
        let s1 = student("s1");
        let (s_conn, mut s_rx) = joined(&router, s1.clone(), "r1").await;
        let (_t_conn, mut t_rx) = joined(&router, teacher("t1"), "r1").await;

        let outcome = router
            .send_message(&s_conn, send_req("r1", &s1, Some("t1"), "Can you explain recursion?"))
            .await
            .unwrap();
        let SendOutcome::Delivered(id) = outcome else {
            panic!("expected delivery, got {outcome:?}");
        };

        let received = message_of(t_rx.try_recv().unwrap());
        assert_eq!(received.id, id);
        assert_eq!(received.room_id, RoomId::new("r1"));
        let bundle = received.content.unwrap();
        assert_eq!(
            XChaChaCipher.decrypt(&bundle).unwrap(),
            "Can you explain recursion?"
        );
        // The sender's own connection is in the room too.
        assert_eq!(message_of(s_rx.try_recv().unwrap()).id, id);
    }

    #[tokio::test]
    async fn offline_recipient_is_queued_then_flushed() {
        let router = router();
        let s1 = student("s1");
        let (s_conn, _s_rx) = joined(&router, s1.clone(), "r1").await;

        let outcome = router
            .send_message(&s_conn, send_req("r1", &s1, Some("t1"), "Are you there?"))
            .await
            .unwrap();
        assert!(matches!(outcome, SendOutcome::Queued(_)));
        assert_eq!(router.pending().list(&UserId::new("t1")).await.unwrap().len(), 1);

        let (t_conn, mut t_rx) = router.open_connection(teacher("t1")).await.unwrap();
        assert_eq!(router.check_missed_messages(&t_conn).await.unwrap(), 1);

        let received = message_of(t_rx.try_recv().unwrap());
        assert_eq!(received.sender_id, UserId::new("s1"));
        assert!(router.pending().list(&UserId::new("t1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn flush_preserves_room_of_each_message() {
        let router = router();
        let s1 = student("s1");
        let s2 = student("s2");
        let (c1, _rx1) = joined(&router, s1.clone(), "r1").await;
        let (c2, _rx2) = joined(&router, s2.clone(), "r2").await;

        router
            .send_message(&c1, send_req("r1", &s1, Some("t1"), "first"))
            .await
            .unwrap();
        router
            .send_message(&c2, send_req("r2", &s2, Some("t1"), "second"))
            .await
            .unwrap();

        let (t_conn, mut t_rx) = router.open_connection(teacher("t1")).await.unwrap();
        assert_eq!(router.check_missed_messages(&t_conn).await.unwrap(), 2);
        assert_eq!(message_of(t_rx.try_recv().unwrap()).room_id, RoomId::new("r1"));
        assert_eq!(message_of(t_rx.try_recv().unwrap()).room_id, RoomId::new("r2"));
    }

    #[tokio::test]
    async fn non_member_join_is_denied_and_changes_nothing() {
        let router = router();
        let (mut conn, _rx) = router.open_connection(student("x")).await.unwrap();

        let outcome = router.join_room(&mut conn, join_req("r1", "x")).await.unwrap();
        assert_eq!(outcome, JoinOutcome::Denied);
        assert!(conn.current_room().is_none());
        assert!(router.hub().room_members(&RoomId::new("r1")).await.is_empty());

        // Unknown rooms are denials too, not errors.
        let outcome = router.join_room(&mut conn, join_req("nope", "x")).await.unwrap();
        assert_eq!(outcome, JoinOutcome::Denied);
    }

    #[tokio::test]
    async fn join_checks_claimed_identity() {
        let router = router();
        let (mut conn, _rx) = router.open_connection(student("s1")).await.unwrap();

        // Claiming the teacher's id does not borrow the teacher's membership.
        let outcome = router.join_room(&mut conn, join_req("r1", "t1")).await.unwrap();
        assert_eq!(outcome, JoinOutcome::Denied);

        let mut req = join_req("r1", "s1");
        req.user_type = Some("teacher".into());
        assert_eq!(router.join_room(&mut conn, req).await.unwrap(), JoinOutcome::Denied);

        let mut req = join_req("r1", "s1");
        req.doubt_status = Some(DoubtStatus::Resolved);
        router.join_room(&mut conn, req).await.unwrap();
        assert_eq!(conn.doubt_status(), Some(DoubtStatus::Resolved));
    }

    #[tokio::test]
    async fn rejoin_moves_between_rooms() {
        let router = router();
        let (mut conn, _rx) = joined(&router, teacher("t1"), "r1").await;

        router.join_room(&mut conn, join_req("r2", "t1")).await.unwrap();
        assert!(router.hub().room_members(&RoomId::new("r1")).await.is_empty());
        assert_eq!(router.hub().room_members(&RoomId::new("r2")).await, vec![conn.id()]);
    }

    #[tokio::test]
    async fn no_recipient_and_empty_room_fails_closed() {
        let router = router();
        let s1 = student("s1");
        let (conn, _rx) = joined(&router, s1.clone(), "r1").await;

        let result = router.send_message(&conn, send_req("r1", &s1, None, "hello?")).await;
        assert!(matches!(result, Err(ChatError::MissingRecipient)));
        assert!(router.pending().list(&UserId::new("t1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_recipient_with_peer_in_room_is_delivered() {
        let router = router();
        let s1 = student("s1");
        let (conn, _rx) = joined(&router, s1.clone(), "r1").await;
        let (_t, mut t_rx) = joined(&router, teacher("t1"), "r1").await;

        let outcome = router
            .send_message(&conn, send_req("r1", &s1, None, "hi"))
            .await
            .unwrap();
        assert!(matches!(outcome, SendOutcome::Delivered(_)));
        assert!(t_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn upload_failure_aborts_send() {
        let router = router();
        let s1 = student("s1");
        let (conn, _rx) = joined(&router, s1.clone(), "r1").await;
        let (_t, mut t_rx) = joined(&router, teacher("t1"), "r1").await;

        let mut req = send_req("r1", &s1, Some("t1"), "see attached");
        for name in ["ok.png", "fail.png"] {
            req.files.push(FileUpload {
                name: name.into(),
                mime_type: "image/png".into(),
                data: "AAAA".into(),
            });
        }

        let result = router.send_message(&conn, req).await;
        assert!(matches!(result, Err(ChatError::UploadFailure(_))));
        assert!(t_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn attachments_are_described() {
        let router = router();
        let s1 = student("s1");
        let (conn, _rx) = joined(&router, s1.clone(), "r1").await;
        let (_t, mut t_rx) = joined(&router, teacher("t1"), "r1").await;

        let mut req = send_req("r1", &s1, Some("t1"), "");
        req.files.push(FileUpload {
            name: "notes.pdf".into(),
            mime_type: "application/pdf".into(),
            data: "AAAA".into(),
        });
        router.send_message(&conn, req).await.unwrap();

        let msg = message_of(t_rx.try_recv().unwrap());
        assert!(msg.content.is_none());
        assert_eq!(msg.files.len(), 1);
        assert_eq!(msg.files[0].name, "notes.pdf");
        assert!(msg.files[0].url.ends_with(&msg.files[0].file_id));
    }

    #[tokio::test]
    async fn too_many_attachments_rejected() {
        let router = router();
        let s1 = student("s1");
        let (conn, _rx) = joined(&router, s1.clone(), "r1").await;

        let mut req = send_req("r1", &s1, Some("t1"), "x");
        req.files = (0..=MAX_ATTACHMENTS)
            .map(|i| FileUpload {
                name: format!("{i}.txt"),
                mime_type: "text/plain".into(),
                data: "AA==".into(),
            })
            .collect();
        assert!(matches!(
            router.send_message(&conn, req).await,
            Err(ChatError::ValidationFailed(_))
        ));
    }

    #[tokio::test]
    async fn encryption_failure_is_fatal() {
        let router = router_with(Arc::new(BrokenCipher), QueueLimit::unbounded());
        let s1 = student("s1");
        let (conn, _rx) = joined(&router, s1.clone(), "r1").await;

        let result = router
            .send_message(&conn, send_req("r1", &s1, Some("t1"), "secret"))
            .await;
        assert!(matches!(result, Err(ChatError::EncryptionFailure(_))));
        assert!(router.pending().list(&UserId::new("t1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sender_must_be_the_connected_user_in_the_room() {
        let router = router();
        let s1 = student("s1");
        let (conn, _rx) = joined(&router, s1.clone(), "r1").await;

        let forged = send_req("r1", &student("s2"), Some("t1"), "spoof");
        assert!(matches!(
            router.send_message(&conn, forged).await,
            Err(ChatError::ValidationFailed(_))
        ));

        let elsewhere = send_req("r2", &s1, Some("t1"), "wrong room");
        assert!(matches!(
            router.send_message(&conn, elsewhere).await,
            Err(ChatError::NotAMember(_))
        ));
    }

    #[tokio::test]
    async fn recipient_must_be_the_other_participant() {
        let router = router();
        let s1 = student("s1");
        let (conn, _rx) = joined(&router, s1.clone(), "r1").await;

        for outsider in ["nobody", "s2", "s1"] {
            let result = router
                .send_message(&conn, send_req("r1", &s1, Some(outsider), "fill your queue"))
                .await;
            assert!(matches!(result, Err(ChatError::ValidationFailed(_))), "{outsider}");
            assert!(router.pending().list(&UserId::new(outsider)).await.unwrap().is_empty());
        }

        // The teacher of r2 may only address r2's student.
        let t1 = teacher("t1");
        let (t_conn, _t_rx) = joined(&router, t1.clone(), "r2").await;
        assert!(matches!(
            router.send_message(&t_conn, send_req("r2", &t1, Some("s1"), "hi")).await,
            Err(ChatError::ValidationFailed(_))
        ));
        assert!(matches!(
            router.send_message(&t_conn, send_req("r2", &t1, Some("s2"), "hi")).await,
            Ok(SendOutcome::Queued(_))
        ));
    }

    #[tokio::test]
    async fn frame_dropped_on_full_buffer_is_parked() {
        let router = router();
        let s1 = student("s1");
        let (s_conn, mut s_rx) = joined(&router, s1.clone(), "r1").await;
        let (t_conn, _t_rx) = joined(&router, teacher("t1"), "r1").await;

        for _ in 0..crate::hub::OUTBOUND_BUFFER {
            assert!(
                router
                    .hub()
                    .emit_to(t_conn.id(), ServerFrame::event("filler", serde_json::json!({})))
                    .await
            );
        }

        let outcome = router
            .send_message(&s_conn, send_req("r1", &s1, Some("t1"), "did you get this?"))
            .await
            .unwrap();
        let SendOutcome::Delivered(id) = outcome else {
            panic!("expected live delivery");
        };

        assert_eq!(message_of(s_rx.try_recv().unwrap()).id, id);
        let parked = router.pending().list(&UserId::new("t1")).await.unwrap();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].payload.id, id);
        assert!(router.pending().list(&s1.user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn activity_keeps_idle_session_online() {
        let store = seeded_store();
        let router = router_on(store.clone());
        let s1 = student("s1");
        let t1 = UserId::new("t1");
        let (s_conn, _s_rx) = joined(&router, s1.clone(), "r1").await;
        let (t_conn, _t_rx) = joined(&router, teacher("t1"), "r1").await;

        age_session(&store, &t_conn, chrono::Duration::seconds(SESSION_TTL_SECS + 60)).await;
        assert!(!router.sessions().is_online(&t1).await.unwrap());

        router.record_activity(&t_conn).await;
        assert!(router.sessions().is_online(&t1).await.unwrap());

        let outcome = router
            .send_message(&s_conn, send_req("r1", &s1, Some("t1"), "still there?"))
            .await
            .unwrap();
        assert!(matches!(outcome, SendOutcome::Delivered(_)));
    }

    #[tokio::test]
    async fn activity_on_superseded_connection_changes_nothing() {
        let router = router();
        let (old, _rx_old) = router.open_connection(teacher("t1")).await.unwrap();
        let (new, _rx_new) = router.open_connection(teacher("t1")).await.unwrap();

        router.record_activity(&old).await;
        let session = router.sessions().get_session(&UserId::new("t1")).await.unwrap().unwrap();
        assert_eq!(session.connection_id, new.id().to_string());
    }

    #[tokio::test]
    async fn full_queue_rejects_when_configured() {
        let limit = QueueLimit {
            max_depth: 1,
            policy: OverflowPolicy::Reject,
        };
        let router = router_with(Arc::new(XChaChaCipher), limit);
        let s1 = student("s1");
        let (conn, _rx) = joined(&router, s1.clone(), "r1").await;

        router
            .send_message(&conn, send_req("r1", &s1, Some("t1"), "one"))
            .await
            .unwrap();
        assert!(matches!(
            router.send_message(&conn, send_req("r1", &s1, Some("t1"), "two")).await,
            Err(ChatError::QueueFull { depth: 1 })
        ));
    }

    #[tokio::test]
    async fn typing_is_broadcast_and_recorded() {
        let router = router();
        let s1 = student("s1");
        let (conn, _rx) = joined(&router, s1.clone(), "r1").await;
        let (_t, mut t_rx) = joined(&router, teacher("t1"), "r1").await;

        let req = TypingStatusRequest {
            room_id: RoomId::new("r1"),
            user_id: s1.user_id.clone(),
            status: true,
        };
        router.typing_status(&conn, req).await.unwrap();

        let frame = t_rx.try_recv().unwrap();
        assert_eq!(frame.event, outbound::USER_TYPING);
        assert_eq!(frame.data["userId"], "s1");
        assert_eq!(frame.data["status"], true);
        assert_eq!(router.typing().list(&RoomId::new("r1")).await.unwrap().len(), 1);

        let stop = TypingStatusRequest {
            room_id: RoomId::new("r1"),
            user_id: s1.user_id.clone(),
            status: false,
        };
        router.typing_status(&conn, stop).await.unwrap();
        assert!(router.typing().list(&RoomId::new("r1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_disconnect_keeps_user_online() {
        let router = router();
        let t1 = UserId::new("t1");
        let (mut old, _rx_old) = router.open_connection(teacher("t1")).await.unwrap();
        let (mut new, _rx_new) = router.open_connection(teacher("t1")).await.unwrap();

        router.disconnect(&mut old).await;
        let session = router.sessions().get_session(&t1).await.unwrap().unwrap();
        assert!(session.is_online());
        assert_eq!(session.connection_id, new.id().to_string());

        router.disconnect(&mut new).await;
        assert!(!router.sessions().is_online(&t1).await.unwrap());
        assert_eq!(router.hub().connection_count().await, 0);
    }

    #[tokio::test]
    async fn unauthenticated_connection_is_refused() {
        let router = router();
        let conn = Connection::new(ConnectionId::new());
        assert!(matches!(
            router.check_missed_messages(&conn).await,
            Err(ChatError::AuthenticationRequired)
        ));
    }
}

//! Route table for inbound frames.
//!
//! Every frame goes through the same pipeline: decode, look up the route,
//! apply the authentication guard, refresh the caller's session, validate the
//! payload, then call the router. Whatever happens, the caller gets back the frames destined for
//! this connection (events and acknowledgments); errors never escape as raw
//! internal detail.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, warn};

use doubtroom_shared::constants::NOT_A_MEMBER_MESSAGE;
use doubtroom_shared::protocol::{inbound, outbound, ClientFrame, ServerFrame};

use crate::connection::Connection;
use crate::error::ChatError;
use crate::router::{ChatRouter, JoinOutcome, SendOutcome};
use crate::validation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Test,
    PingCheck,
    JoinDoubtRoom,
    SendMessage,
    CheckMissedMessages,
    TypingStatus,
}

impl Route {
    pub fn from_event(event: &str) -> Option<Self> {
        match event {
            inbound::TEST => Some(Route::Test),
            inbound::PING_CHECK => Some(Route::PingCheck),
            inbound::JOIN_DOUBT_ROOM => Some(Route::JoinDoubtRoom),
            inbound::SEND_MESSAGE => Some(Route::SendMessage),
            inbound::CHECK_MISSED_MESSAGES => Some(Route::CheckMissedMessages),
            inbound::TYPING_STATUS => Some(Route::TypingStatus),
            _ => None,
        }
    }

    /// `test` and `ping_check` are open diagnostics.
    pub fn requires_auth(self) -> bool {
        !matches!(self, Route::Test | Route::PingCheck)
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    router: ChatRouter,
}

impl Dispatcher {
    pub fn new(router: ChatRouter) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &ChatRouter {
        &self.router
    }

    /// Handle one text frame and return the replies for this connection.
    pub async fn dispatch(&self, conn: &mut Connection, raw: &str) -> Vec<ServerFrame> {
        let frame: ClientFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(conn = %conn.id(), error = %e, "Invalid frame");
                return vec![ServerFrame::error("Invalid frame")];
            }
        };

        let ack_id = frame.ack_id;
        let Some(route) = Route::from_event(&frame.event) else {
            debug!(conn = %conn.id(), event = %frame.event, "Unknown event");
            return vec![reply_error(ack_id, &format!("Unknown event: {}", frame.event))];
        };

        if route.requires_auth() {
            if let Err(e) = conn.require_identity() {
                return vec![reply_error(ack_id, &e.client_message())];
            }
        }
        self.router.record_activity(conn).await;

        match self.handle(route, conn, frame.payload()).await {
            Ok(Reply { events, ack }) => {
                let mut out = events;
                if let (Some(id), Some(body)) = (ack_id, ack) {
                    out.push(ServerFrame::ack(id, body));
                }
                out
            }
            Err(e) => {
                match &e {
                    ChatError::ValidationFailed(_)
                    | ChatError::NotAMember(_)
                    | ChatError::MissingRecipient
                    | ChatError::QueueFull { .. } => {
                        debug!(conn = %conn.id(), ?route, error = %e, "Request refused")
                    }
                    _ => warn!(conn = %conn.id(), ?route, error = %e, "Handler failed"),
                }
                vec![error_reply(route, ack_id, &e)]
            }
        }
    }

    async fn handle(
        &self,
        route: Route,
        conn: &mut Connection,
        data: Value,
    ) -> Result<Reply, ChatError> {
        match route {
            Route::Test => {
                let name = data
                    .get("my_name")
                    .or_else(|| data.get("data").and_then(|d| d.get("my_name")))
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown");
                let body = json!({ "message": format!("Hello {name}, your socket is working fine!") });
                Ok(Reply::event_and_ack(outbound::TEST_RESPONSE, body))
            }
            Route::PingCheck => {
                let body = json!({
                    "ok": true,
                    "now": Utc::now().timestamp_millis(),
                    "echo": data,
                });
                Ok(Reply::event_and_ack(outbound::PONG_CHECK, body))
            }
            Route::JoinDoubtRoom => {
                let req = validation::JOIN_ROOM.parse(data)?;
                let body = match self.router.join_room(conn, req).await? {
                    JoinOutcome::Joined(room_id) => json!({ "ok": true, "roomId": room_id }),
                    JoinOutcome::Denied => json!({ "ok": false, "message": NOT_A_MEMBER_MESSAGE }),
                };
                Ok(Reply::ack(body))
            }
            Route::SendMessage => {
                let req = validation::SEND_MESSAGE.parse(data)?;
                let body = match self.router.send_message(conn, req).await? {
                    SendOutcome::Delivered(id) => json!({ "delivered": true, "messageId": id }),
                    SendOutcome::Queued(id) => json!({ "queued": true, "messageId": id }),
                };
                Ok(Reply::ack(body))
            }
            Route::CheckMissedMessages => {
                let delivered = self.router.check_missed_messages(conn).await?;
                Ok(Reply::ack(json!({ "ok": true, "delivered": delivered })))
            }
            Route::TypingStatus => {
                let req = validation::TYPING_STATUS.parse(data)?;
                self.router.typing_status(conn, req).await?;
                Ok(Reply::ack(json!({ "ok": true })))
            }
        }
    }
}

/// Frames produced by a successful handler.
struct Reply {
    events: Vec<ServerFrame>,
    ack: Option<Value>,
}

impl Reply {
    fn ack(body: Value) -> Self {
        Self {
            events: Vec::new(),
            ack: Some(body),
        }
    }

    fn event_and_ack(event: &str, body: Value) -> Self {
        Self {
            events: vec![ServerFrame::event(event, body.clone())],
            ack: Some(body),
        }
    }
}

fn reply_error(ack_id: Option<u64>, message: &str) -> ServerFrame {
    match ack_id {
        Some(id) => ServerFrame::ack(id, json!({ "error": message })),
        None => ServerFrame::error(message),
    }
}

/// Error body in the shape each route's acknowledgment uses.
fn error_reply(route: Route, ack_id: Option<u64>, err: &ChatError) -> ServerFrame {
    let message = err.client_message();
    let Some(id) = ack_id else {
        return ServerFrame::error(&message);
    };
    let body = match route {
        Route::JoinDoubtRoom | Route::CheckMissedMessages => {
            json!({ "ok": false, "error": message })
        }
        _ => json!({ "error": message }),
    };
    ServerFrame::ack(id, body)
}

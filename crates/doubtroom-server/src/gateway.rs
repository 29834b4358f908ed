//! Connection gateway.
//!
//! Identity is settled on the HTTP upgrade request, before any socket exists:
//! a connection without acceptable claims gets a 401 and never reaches the
//! dispatcher. Accepted sockets get a writer task draining the connection's
//! outbound channel and a read loop feeding frames to the dispatcher in
//! arrival order.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use doubtroom_shared::error::{TokenError, UnknownVariant};
use doubtroom_shared::token::{verify_connect_token, ConnectToken};
use doubtroom_shared::types::{Role, UserId};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::connection::{Connection, Identity};
use crate::dispatcher::Dispatcher;

pub const TOKEN_HEADER: &str = "x-connect-token";

#[derive(Debug, Error)]
pub enum Rejection {
    #[error("Authentication required: connection token or userid and role needed")]
    MissingClaims,

    #[error("Connection tokens are not accepted by this server")]
    TokensDisabled,

    #[error("Invalid connection token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("Invalid role: {0}")]
    InvalidRole(#[from] UnknownVariant),
}

/// Decides which identity claims a new connection may carry.
#[derive(Debug, Clone)]
pub struct IdentityVerifier {
    server_pubkey: Option<[u8; 32]>,
    trust_headers: bool,
    max_lifetime: Duration,
}

impl IdentityVerifier {
    pub fn new(server_pubkey: Option<[u8; 32]>, trust_headers: bool, max_lifetime: Duration) -> Self {
        Self {
            server_pubkey,
            trust_headers,
            max_lifetime,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.auth_server_pubkey,
            config.trust_identity_headers,
            config.token_max_lifetime(),
        )
    }

    pub fn accepts_tokens(&self) -> bool {
        self.server_pubkey.is_some()
    }

    pub fn trusts_headers(&self) -> bool {
        self.trust_headers
    }

    /// Resolve the caller's identity from a signed token (header first, then
    /// query string) or, in trusted-header mode only, the `userid` and `role`
    /// headers. A presented token that fails verification is final.
    pub fn identify(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Identity, Rejection> {
        let presented = header_str(headers, TOKEN_HEADER).or(query_token.filter(|t| !t.is_empty()));

        if let Some(raw) = presented {
            let Some(pubkey) = self.server_pubkey else {
                return Err(Rejection::TokensDisabled);
            };
            let token = ConnectToken::decode(raw)?;
            verify_connect_token(&token, &pubkey, self.max_lifetime, now)?;
            return Ok(Identity {
                user_id: token.user_id,
                role: token.role,
            });
        }

        if !self.trust_headers {
            return Err(Rejection::MissingClaims);
        }
        match (header_str(headers, "userid"), header_str(headers, "role")) {
            (Some(user), Some(role)) => Ok(Identity {
                user_id: UserId::new(user),
                role: role.parse::<Role>()?,
            }),
            _ => Err(Rejection::MissingClaims),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    token: Option<String>,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
) -> Response {
    let identity = match state
        .verifier
        .identify(&headers, params.token.as_deref(), Utc::now())
    {
        Ok(identity) => identity,
        Err(rejection) => {
            warn!(reason = %rejection, "Connection rejected");
            let body = serde_json::json!({ "error": rejection.to_string() });
            return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
        }
    };

    info!(user = %identity.user_id, role = %identity.role, "Connection accepted");
    let dispatcher = state.dispatcher.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, dispatcher, identity))
}

async fn handle_socket(socket: WebSocket, dispatcher: Dispatcher, identity: Identity) {
    let router = dispatcher.router().clone();
    let user = identity.user_id.clone();

    let (mut conn, mut rx) = match router.open_connection(identity).await {
        Ok(pair) => pair,
        Err(e) => {
            error!(user = %user, error = %e, "Could not record session, closing socket");
            return;
        }
    };
    let conn_id = conn.id();

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!(conn = %conn_id, error = %e, "Unencodable frame dropped");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    'read: while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Text(text) => {
                if !relay(&dispatcher, &mut conn, &text).await {
                    debug!(conn = %conn_id, "Outbound channel gone");
                    break 'read;
                }
            }
            // Pong replies are sent by tungstenite; the ping still counts as activity.
            Message::Ping(_) => router.record_activity(&conn).await,
            Message::Close(_) => break 'read,
            _ => {} // Binary is not part of the protocol
        }
    }

    debug!(conn = %conn_id, user = %user, "Socket closed");
    router.disconnect(&mut conn).await;
    writer.abort();
}

/// Dispatch one text frame and queue its replies on the connection's
/// outbound channel. Returns `false` once that channel is gone.
async fn relay(dispatcher: &Dispatcher, conn: &mut Connection, text: &str) -> bool {
    for reply in dispatcher.dispatch(conn, text).await {
        if !dispatcher.router().hub().emit_to(conn.id(), reply).await {
            return false;
        }
    }
    true
}

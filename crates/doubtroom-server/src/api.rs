use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, Method},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use doubtroom_shared::constants::{APP_NAME, PROTOCOL_VERSION};
use doubtroom_shared::protocol::{
    outbound, DoubtResolved, DoubtStatusUpdated, NewDoubt, ServerFrame,
};
use doubtroom_shared::types::{DoubtStatus, RoomId, UserId};
use doubtroom_store::{Doubt, PendingMessage, Session, StoreError, TypingStatus};

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{ChatError, ServerError};
use crate::files::DiskFileStore;
use crate::gateway::{ws_handler, IdentityVerifier};
use crate::store::StoreHandle;

/// Attachments travel base64-encoded inside a WebSocket frame; the REST side
/// only ever receives small JSON bodies.
const MAX_BODY_SIZE: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: StoreHandle,
    pub dispatcher: Dispatcher,
    pub files: Arc<DiskFileStore>,
    pub verifier: Arc<IdentityVerifier>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);

    let internal = Router::new()
        .route("/internal/doubts", post(create_doubt))
        .route("/internal/doubts/{room_id}/status", post(update_doubt_status))
        .route("/internal/presence", get(list_presence))
        .route("/internal/presence/{user_id}", get(get_presence))
        .route("/internal/connections/{connection_id}", get(connection_owner))
        .route("/internal/rooms/{room_id}/typing", get(room_typing))
        .route(
            "/internal/pending/{user_id}",
            get(list_pending).delete(clear_pending),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws_handler))
        .route("/files/{id}", get(file_download))
        .merge(internal)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let list: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(list))
}

// ─── Public endpoints ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: &'static str,
    version: &'static str,
    protocol: &'static str,
    connections: usize,
    token_auth: bool,
    legacy_headers: bool,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: APP_NAME,
        version: env!("CARGO_PKG_VERSION"),
        protocol: PROTOCOL_VERSION,
        connections: state.dispatcher.router().hub().connection_count().await,
        token_auth: state.verifier.accepts_tokens(),
        legacy_headers: state.verifier.trusts_headers(),
    })
}

async fn file_download(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServerError> {
    let (data, meta) = state.files.get_file(id).await?;
    let disposition = format!("inline; filename=\"{}\"", meta.name.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, meta.mime_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    )
        .into_response())
}

// ─── Internal bridge ───

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Internal API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    verify_admin_token(request.headers(), &state.config)?;
    Ok(next.run(request).await)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDoubtRequest {
    title: String,
    #[serde(default)]
    description: String,
    student_id: UserId,
    teacher_id: UserId,
    #[serde(default)]
    room_id: Option<RoomId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DoubtResponse {
    doubt: Doubt,
    /// Live connections the notification reached.
    notified: usize,
}

async fn create_doubt(
    State(state): State<AppState>,
    Json(req): Json<CreateDoubtRequest>,
) -> Result<Json<DoubtResponse>, ServerError> {
    if req.title.trim().is_empty() {
        return Err(ServerError::BadRequest("title is required".into()));
    }

    let now = Utc::now();
    let doubt = Doubt {
        id: Uuid::new_v4(),
        title: req.title,
        description: req.description,
        student_id: req.student_id,
        teacher_id: req.teacher_id,
        room_id: req.room_id.unwrap_or_else(RoomId::generate),
        status: DoubtStatus::Unresolved,
        created_at: now,
        updated_at: now,
    };

    let record = doubt.clone();
    let inserted = state
        .store
        .call(move |db| match db.get_doubt_by_room(&record.room_id) {
            Ok(_) => Ok(false),
            Err(StoreError::NotFound) => db.insert_doubt(&record).map(|_| true),
            Err(e) => Err(e),
        })
        .await?;
    if !inserted {
        return Err(ServerError::BadRequest(format!(
            "Room {} already has a doubt",
            doubt.room_id
        )));
    }

    let frame = ServerFrame::typed(
        outbound::NEW_DOUBT,
        &NewDoubt {
            doubt_id: doubt.id,
            title: doubt.title.clone(),
            description: doubt.description.clone(),
            student_id: doubt.student_id.clone(),
            room_id: doubt.room_id.clone(),
        },
    )
    .map_err(ChatError::from)?;
    let notified = state
        .dispatcher
        .router()
        .hub()
        .emit_to_user(&doubt.teacher_id, frame)
        .await;

    info!(doubt = %doubt.id, room = %doubt.room_id, teacher = %doubt.teacher_id, notified, "Doubt created");
    Ok(Json(DoubtResponse { doubt, notified }))
}

#[derive(Deserialize)]
struct StatusUpdateRequest {
    status: DoubtStatus,
}

async fn update_doubt_status(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<DoubtResponse>, ServerError> {
    let room = room_id.clone();
    let doubt = state
        .store
        .call(move |db| db.update_doubt_status(&room, req.status, Utc::now()))
        .await
        .map_err(|e| match e {
            ChatError::NotFound => ChatError::RoomNotFound(room_id.clone()),
            other => other,
        })?;

    let hub = state.dispatcher.router().hub();
    let update = ServerFrame::typed(
        outbound::DOUBT_STATUS_UPDATED,
        &DoubtStatusUpdated {
            room_id: doubt.room_id.clone(),
            status: doubt.status,
            updated_at: doubt.updated_at,
        },
    )
    .map_err(ChatError::from)?;
    let mut notified = hub.broadcast(&doubt.room_id, update).await;

    if doubt.status == DoubtStatus::Resolved {
        let resolved = ServerFrame::typed(
            outbound::DOUBT_RESOLVED,
            &DoubtResolved {
                doubt_id: doubt.id,
                room_id: doubt.room_id.clone(),
            },
        )
        .map_err(ChatError::from)?;
        notified += hub.emit_to_user(&doubt.student_id, resolved).await;
    }

    info!(room = %doubt.room_id, status = %doubt.status, notified, "Doubt status updated");
    Ok(Json(DoubtResponse { doubt, notified }))
}

async fn list_presence(State(state): State<AppState>) -> Result<Json<Vec<Session>>, ServerError> {
    let sessions = state.dispatcher.router().sessions().list_online().await?;
    Ok(Json(sessions))
}

async fn get_presence(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<Session>, ServerError> {
    state
        .dispatcher
        .router()
        .sessions()
        .get_session(&user_id)
        .await?
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("No session for {user_id}")))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionOwner {
    user_id: UserId,
}

async fn connection_owner(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> Result<Json<ConnectionOwner>, ServerError> {
    state
        .dispatcher
        .router()
        .sessions()
        .user_by_connection(&connection_id)
        .await?
        .map(|user_id| Json(ConnectionOwner { user_id }))
        .ok_or_else(|| ServerError::NotFound(format!("No user on connection {connection_id}")))
}

async fn room_typing(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<Vec<TypingStatus>>, ServerError> {
    let typing = state.dispatcher.router().typing().list(&room_id).await?;
    Ok(Json(typing))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingQuery {
    #[serde(default)]
    room_id: Option<RoomId>,
}

async fn list_pending(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<PendingQuery>,
) -> Result<Json<Vec<PendingMessage>>, ServerError> {
    let pending = state.dispatcher.router().pending();
    let entries = match query.room_id {
        Some(room) => pending.list_for_room(&user_id, &room).await?,
        None => pending.list(&user_id).await?,
    };
    Ok(Json(entries))
}

async fn clear_pending(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<PendingQuery>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let pending = state.dispatcher.router().pending();
    let removed = match query.room_id {
        Some(room) => pending.clear_for_room(&user_id, &room).await?,
        None => pending.clear(&user_id).await?,
    };
    Ok(Json(serde_json::json!({ "removed": removed })))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP + WebSocket server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

//! # doubtroom-server
//!
//! Real-time core of the doubt-resolution chat service.
//!
//! This binary provides:
//! - **WebSocket gateway** that admits connections carrying a signed identity
//!   token (or trusted headers in legacy mode) and feeds their frames to the
//!   event dispatcher
//! - **Message router** enforcing room membership, encrypting message text,
//!   storing attachments, and either fanning messages out live or parking
//!   them in the recipient's pending queue
//! - **Presence, typing and pending-queue state** in SQLite with TTL expiry
//! - **Internal REST bridge** (axum) for doubt notifications, presence
//!   lookups and attachment retrieval

mod api;
mod cipher;
mod config;
mod connection;
mod dispatcher;
mod error;
mod files;
mod gateway;
mod hub;
mod membership;
mod pending;
mod presence;
mod router;
mod store;
mod typing;
mod validation;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use doubtroom_store::Database;

use crate::api::AppState;
use crate::cipher::XChaChaCipher;
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::files::DiskFileStore;
use crate::gateway::IdentityVerifier;
use crate::hub::Hub;
use crate::router::ChatRouter;
use crate::store::StoreHandle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,doubtroom_server=debug")),
        )
        .init();

    info!("Starting doubtroom server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        addr = %config.http_addr,
        database = %config.database_path.display(),
        token_auth = config.auth_server_pubkey.is_some(),
        legacy_headers = config.trust_identity_headers,
        pending_max_depth = config.pending_max_depth,
        admin_enabled = config.admin_token.is_some(),
        "Loaded configuration"
    );
    if config.auth_server_pubkey.is_none() && !config.trust_identity_headers {
        warn!("Neither AUTH_SERVER_PUBKEY nor TRUST_IDENTITY_HEADERS is set; every connection will be refused");
    }

    // -----------------------------------------------------------------------
    // 3. Open storage (runs migrations) before anything depends on it
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;
    let store = StoreHandle::new(db);

    // -----------------------------------------------------------------------
    // 4. Initialize components
    // -----------------------------------------------------------------------
    let hub = Hub::new();

    let files = Arc::new(
        DiskFileStore::new(
            config.file_storage_path.clone(),
            config.max_file_size,
            config.public_base_url.clone(),
        )
        .await?,
    );

    let router = ChatRouter::new(
        store.clone(),
        hub,
        Arc::new(XChaChaCipher),
        files.clone(),
        config.queue_limit(),
    );

    let app_state = AppState {
        store: store.clone(),
        dispatcher: Dispatcher::new(router),
        files,
        verifier: Arc::new(IdentityVerifier::from_config(&config)),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 5. Spawn the expired-row sweeper
    // -----------------------------------------------------------------------
    let sweeper_store = store.clone();
    let period = Duration::from_secs(config.purge_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let purged = sweeper_store
                .call(|db| {
                    let now = Utc::now();
                    Ok((
                        db.purge_expired_sessions(now)?,
                        db.purge_expired_typing(now)?,
                        db.purge_expired_pending(now)?,
                    ))
                })
                .await;
            match purged {
                Ok((sessions, typing, pending)) => {
                    debug!(sessions, typing, pending, "Purged expired rows");
                }
                Err(e) => warn!(error = %e, "Expired-row purge failed"),
            }
        }
    });

    // -----------------------------------------------------------------------
    // 6. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

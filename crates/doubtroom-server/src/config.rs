//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use doubtroom_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_MAX_FILE_SIZE};
use doubtroom_store::{OverflowPolicy, QueueLimit};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API and the WebSocket endpoint.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./doubtroom.db`
    pub database_path: PathBuf,

    /// Directory where message attachments are written.
    /// Env: `FILE_STORAGE_PATH`
    /// Default: `./attachments`
    pub file_storage_path: PathBuf,

    /// Prefix for attachment retrieval links handed to clients.
    /// Env: `PUBLIC_BASE_URL`
    /// Default: `http://localhost:3000`
    pub public_base_url: String,

    /// Maximum attachment size in bytes.
    /// Env: `MAX_FILE_SIZE`
    pub max_file_size: usize,

    /// Ed25519 public key of the identity service (hex-encoded, 64 chars).
    /// Env: `AUTH_SERVER_PUBKEY`
    /// Default: unset (signed connection tokens are refused).
    pub auth_server_pubkey: Option<[u8; 32]>,

    /// Accept the unsigned `userid` / `role` headers.
    /// Env: `TRUST_IDENTITY_HEADERS` (true/false)
    /// Default: `false`
    pub trust_identity_headers: bool,

    /// Longest validity window accepted on a connection token.
    /// Env: `TOKEN_MAX_LIFETIME_SECS`
    /// Default: `3600`
    pub token_max_lifetime_secs: i64,

    /// Per-recipient pending queue cap (0 = unbounded).
    /// Env: `PENDING_MAX_DEPTH`
    /// Default: `500`
    pub pending_max_depth: usize,

    /// Env: `PENDING_OVERFLOW` (`evict-oldest` | `reject`)
    /// Default: `evict-oldest`
    pub pending_overflow: OverflowPolicy,

    /// Bearer token for `/internal/*` endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (internal API disabled).
    pub admin_token: Option<String>,

    /// CORS origins, comma separated. `*` allows any origin.
    /// Env: `ALLOWED_ORIGINS`
    pub allowed_origins: Vec<String>,

    /// Period of the expired-row sweeper.
    /// Env: `PURGE_INTERVAL_SECS`
    /// Default: `60`
    pub purge_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./doubtroom.db"),
            file_storage_path: PathBuf::from("./attachments"),
            public_base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            auth_server_pubkey: None,
            trust_identity_headers: false,
            token_max_lifetime_secs: 3600,
            pending_max_depth: 500,
            pending_overflow: OverflowPolicy::EvictOldest,
            admin_token: None,
            allowed_origins: vec!["*".to_string()],
            purge_interval_secs: 60,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("FILE_STORAGE_PATH") {
            config.file_storage_path = PathBuf::from(path);
        }

        if let Some(url) = lookup("PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(val) = lookup("MAX_FILE_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_file_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_FILE_SIZE, using default"),
            }
        }

        if let Some(hex_key) = lookup("AUTH_SERVER_PUBKEY") {
            match parse_hex_pubkey(&hex_key) {
                Ok(key) => config.auth_server_pubkey = Some(key),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid AUTH_SERVER_PUBKEY, signed connection tokens disabled"
                    );
                }
            }
        }

        if let Some(val) = lookup("TRUST_IDENTITY_HEADERS") {
            config.trust_identity_headers = val == "true" || val == "1";
        }

        if let Some(val) = lookup("TOKEN_MAX_LIFETIME_SECS") {
            match val.parse::<i64>() {
                Ok(n) if n > 0 => config.token_max_lifetime_secs = n,
                _ => tracing::warn!(value = %val, "Invalid TOKEN_MAX_LIFETIME_SECS, using default"),
            }
        }

        if let Some(val) = lookup("PENDING_MAX_DEPTH") {
            if let Ok(n) = val.parse::<usize>() {
                config.pending_max_depth = n;
            } else {
                tracing::warn!(value = %val, "Invalid PENDING_MAX_DEPTH, using default");
            }
        }

        if let Some(val) = lookup("PENDING_OVERFLOW") {
            match val.to_ascii_lowercase().as_str() {
                "evict-oldest" => config.pending_overflow = OverflowPolicy::EvictOldest,
                "reject" => config.pending_overflow = OverflowPolicy::Reject,
                _ => tracing::warn!(value = %val, "Invalid PENDING_OVERFLOW, using default"),
            }
        }

        if let Some(token) = lookup("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(val) = lookup("ALLOWED_ORIGINS") {
            let origins: Vec<String> = val
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
            if !origins.is_empty() {
                config.allowed_origins = origins;
            }
        }

        if let Some(val) = lookup("PURGE_INTERVAL_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.purge_interval_secs = n,
                _ => tracing::warn!(value = %val, "Invalid PURGE_INTERVAL_SECS, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    pub fn queue_limit(&self) -> QueueLimit {
        QueueLimit {
            max_depth: self.pending_max_depth,
            policy: self.pending_overflow,
        }
    }

    pub fn token_max_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_max_lifetime_secs)
    }
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_pubkey(raw: &str) -> Result<[u8; 32], String> {
    let raw = raw.trim();
    if raw.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", raw.len()));
    }
    let bytes = hex::decode(raw).map_err(|e| e.to_string())?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

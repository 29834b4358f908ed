/// Wire protocol version reported by `/info`.
pub const PROTOCOL_VERSION: &str = "/doubtroom/1.0.0";

/// Application name
pub const APP_NAME: &str = "Doubtroom";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Inactivity window after which a session record expires (30 minutes).
pub const SESSION_TTL_SECS: i64 = 30 * 60;

/// Lifetime of a typing indicator entry.
pub const TYPING_TTL_SECS: i64 = 10;

/// Safeguard expiry for undelivered messages (7 days).
pub const PENDING_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Maximum number of attachments on a single message.
pub const MAX_ATTACHMENTS: usize = 5;

/// Default per-attachment size limit (10 MiB).
pub const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Default HTTP / WebSocket port
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Acknowledgment text for a failed membership check.
pub const NOT_A_MEMBER_MESSAGE: &str = "You are not a member";

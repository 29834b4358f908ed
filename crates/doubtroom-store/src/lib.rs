//! # doubtroom-store
//!
//! SQLite storage for the doubt-resolution chat core.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed operations for presence sessions, the
//! pending-message queue, typing indicators, doubts and the student/teacher
//! profile presence mirror. Every mutation is a single SQL statement or a
//! transaction, so concurrent callers never lose updates to
//! read-then-write races in the application layer.
//!
//! Rows with a time-to-live carry an `expires_at` column. Reads filter
//! expired rows; the `purge_expired_*` helpers delete them.

pub mod database;
pub mod doubts;
pub mod migrations;
pub mod models;
pub mod pending;
pub mod profiles;
pub mod sessions;
pub mod typing;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;

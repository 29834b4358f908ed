//! Async handle over the synchronous SQLite [`Database`].
//!
//! Every call runs on the blocking pool with the connection locked for the
//! duration of one store operation. Store operations are single statements
//! or transactions, so handlers never interleave inside a read-modify-write.

use std::sync::{Arc, Mutex};

use doubtroom_store::Database;

use crate::error::ChatError;

#[derive(Clone)]
pub struct StoreHandle {
    db: Arc<Mutex<Database>>,
}

impl StoreHandle {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `f` against the database on the blocking pool.
    pub async fn call<F, T>(&self, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(&Database) -> doubtroom_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|_| ChatError::StorageUnavailable("database lock poisoned".into()))?;
            f(&guard).map_err(ChatError::from)
        })
        .await
        .map_err(|e| ChatError::StorageUnavailable(format!("store task failed: {e}")))?
    }
}

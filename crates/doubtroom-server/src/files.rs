//! Attachment storage on local disk.
//!
//! Each upload is written as `<uuid>` next to a `<uuid>.json` sidecar holding
//! its name and MIME type. Retrieval links point at `GET /files/{id}`.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use doubtroom_shared::protocol::FileUpload;

use crate::error::{ChatError, ServerError};

/// File-storage capability used by the message router.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Persist one upload and return its opaque id.
    async fn upload(&self, file: &FileUpload) -> Result<String, ChatError>;

    /// Retrieval URL for a stored id.
    fn link(&self, file_id: &str) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub name: String,
    pub mime_type: String,
}

/// Verify that a resolved path stays within the base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(base)
        .unwrap_or(target)
        .components()
    {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::ParentDir => {
                return Err(ServerError::BadRequest("Path traversal detected".to_string()));
            }
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::BadRequest("Path traversal detected".to_string()));
    }
    Ok(resolved)
}

#[derive(Debug, Clone)]
pub struct DiskFileStore {
    base_path: PathBuf,
    max_size: usize,
    public_base_url: String,
}

impl DiskFileStore {
    pub async fn new(
        base_path: PathBuf,
        max_size: usize,
        public_base_url: String,
    ) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::FileStorage(format!(
                "Failed to create attachment directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Attachment store initialized");

        Ok(Self {
            base_path,
            max_size,
            public_base_url,
        })
    }

    pub async fn store_file(&self, data: &[u8], meta: &FileMeta) -> Result<Uuid, ServerError> {
        if data.is_empty() {
            return Err(ServerError::BadRequest("Empty file".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::FileTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let id = Uuid::new_v4();
        let (data_path, meta_path) = self.safe_paths(&id)?;
        let meta_json =
            serde_json::to_vec(meta).map_err(|e| ServerError::FileStorage(e.to_string()))?;

        fs::write(&data_path, data)
            .await
            .map_err(|e| ServerError::FileStorage(format!("Failed to write file {id}: {e}")))?;
        fs::write(&meta_path, meta_json)
            .await
            .map_err(|e| ServerError::FileStorage(format!("Failed to write metadata {id}: {e}")))?;

        debug!(id = %id, size = data.len(), mime = %meta.mime_type, "Stored attachment");
        Ok(id)
    }

    pub async fn get_file(&self, id: Uuid) -> Result<(Vec<u8>, FileMeta), ServerError> {
        let (data_path, meta_path) = self.safe_paths(&id)?;

        if !data_path.exists() {
            return Err(ServerError::FileNotFound(id));
        }

        let data = fs::read(&data_path)
            .await
            .map_err(|e| ServerError::FileStorage(format!("Failed to read file {id}: {e}")))?;
        let meta = match fs::read(&meta_path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|e| ServerError::FileStorage(format!("Corrupt metadata {id}: {e}")))?,
            Err(_) => FileMeta {
                name: id.to_string(),
                mime_type: "application/octet-stream".to_string(),
            },
        };

        debug!(id = %id, size = data.len(), "Retrieved attachment");
        Ok((data, meta))
    }

    fn safe_paths(&self, id: &Uuid) -> Result<(PathBuf, PathBuf), ServerError> {
        let data = ensure_within(&self.base_path, &self.base_path.join(id.to_string()))?;
        let meta = ensure_within(&self.base_path, &self.base_path.join(format!("{id}.json")))?;
        Ok((data, meta))
    }
}

#[async_trait]
impl FileStorage for DiskFileStore {
    async fn upload(&self, file: &FileUpload) -> Result<String, ChatError> {
        let bytes = STANDARD
            .decode(file.data.trim())
            .map_err(|e| ChatError::UploadFailure(format!("{}: invalid base64: {e}", file.name)))?;
        let meta = FileMeta {
            name: file.name.clone(),
            mime_type: file.mime_type.clone(),
        };
        let id = self
            .store_file(&bytes, &meta)
            .await
            .map_err(|e| ChatError::UploadFailure(format!("{}: {e}", file.name)))?;
        Ok(id.to_string())
    }

    fn link(&self, file_id: &str) -> String {
        format!("{}/files/{}", self.public_base_url, file_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (DiskFileStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = DiskFileStore::new(
            dir.path().to_path_buf(),
            1024,
            "http://localhost:3000".into(),
        )
        .await
        .unwrap();
        (store, dir)
    }

    fn upload(data: &[u8]) -> FileUpload {
        FileUpload {
            name: "notes.pdf".into(),
            mime_type: "application/pdf".into(),
            data: STANDARD.encode(data),
        }
    }

    #[tokio::test]
    async fn test_upload_and_get() {
        let (store, _dir) = test_store().await;

        let id = store.upload(&upload(b"%PDF-1.7")).await.unwrap();
        let (data, meta) = store.get_file(id.parse().unwrap()).await.unwrap();
        assert_eq!(data, b"%PDF-1.7");
        assert_eq!(meta.mime_type, "application/pdf");
        assert_eq!(store.link(&id), format!("http://localhost:3000/files/{id}"));
    }

    #[tokio::test]
    async fn test_oversized_upload_fails() {
        let (store, _dir) = test_store().await;
        let result = store.upload(&upload(&[0u8; 2048])).await;
        assert!(matches!(result, Err(ChatError::UploadFailure(_))));
    }

    #[tokio::test]
    async fn test_bad_base64_fails() {
        let (store, _dir) = test_store().await;
        let mut file = upload(b"x");
        file.data = "@@not base64@@".into();
        assert!(matches!(store.upload(&file).await, Err(ChatError::UploadFailure(_))));
    }

    #[tokio::test]
    async fn test_not_found() {
        let (store, _dir) = test_store().await;
        assert!(matches!(
            store.get_file(Uuid::new_v4()).await,
            Err(ServerError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_traversal_rejected() {
        let base = Path::new("/srv/attachments");
        assert!(ensure_within(base, &base.join("../etc/passwd")).is_err());
    }
}

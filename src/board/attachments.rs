//! Local-disk storage for task attachments.
//!
//! Bytes live in one flat directory, each file named by a random v4 UUID
//! (the `storage_key`). Metadata lives in the database.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::errors::BoardError;

#[derive(Debug, Clone)]
pub struct AttachmentStore {
    dir: PathBuf,
    max_bytes: usize,
}

impl AttachmentStore {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create attachment directory {}", self.dir.display()))
    }

    pub fn check_size(&self, size: usize) -> Result<(), BoardError> {
        if size == 0 {
            return Err(BoardError::BadRequest("Attachment is empty".into()));
        }
        if size > self.max_bytes {
            return Err(BoardError::PayloadTooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Only keys this store generated resolve to a path.
    fn path_for(&self, storage_key: &str) -> Result<PathBuf> {
        Uuid::parse_str(storage_key)
            .map_err(|_| anyhow::anyhow!("Invalid storage key: {}", storage_key))?;
        Ok(self.dir.join(storage_key))
    }

    /// Write `bytes` under a fresh key and return the key.
    pub async fn save(&self, bytes: &[u8]) -> Result<String> {
        self.check_size(bytes.len())?;
        self.ensure_dir().await?;
        let key = Uuid::new_v4().to_string();
        let path = self.path_for(&key)?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write attachment {}", path.display()))?;
        tracing::debug!(storage_key = %key, size = bytes.len(), "attachment stored");
        Ok(key)
    }

    pub async fn read(&self, storage_key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(storage_key)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read attachment {}", path.display()))
    }

    /// Delete stored files, logging instead of failing on errors. The
    /// database rows are already gone by the time this runs.
    pub async fn remove_all(&self, storage_keys: &[String]) {
        for key in storage_keys {
            let path = match self.path_for(key) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(storage_key = %key, error = %e, "skipping attachment removal");
                    continue;
                }
            };
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove attachment file");
                }
            }
        }
    }
}

/// Content type for an upload: the client's header if usable, otherwise a
/// guess from the file name.
pub fn content_type_for(file_name: &str, declared: Option<&str>) -> String {
    match declared.map(str::trim) {
        Some(value) if !value.is_empty() && value != "application/octet-stream" => value.to_string(),
        _ => mime_guess::from_path(file_name)
            .first_or_octet_stream()
            .to_string(),
    }
}

/// File name safe to echo back in a `Content-Disposition` header.
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control() && *c != '"')
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "attachment".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_read_remove() -> Result<()> {
        let dir = TempDir::new()?;
        let store = AttachmentStore::new(dir.path().join("files"), 1024);

        let key = store.save(b"hello").await?;
        assert!(Uuid::parse_str(&key).is_ok());
        assert_eq!(store.read(&key).await?, b"hello");

        store.remove_all(std::slice::from_ref(&key)).await;
        assert!(store.read(&key).await.is_err());
        // Removing again is silent.
        store.remove_all(&[key]).await;
        Ok(())
    }

    #[tokio::test]
    async fn test_size_limits() {
        let dir = TempDir::new().unwrap();
        let store = AttachmentStore::new(dir.path(), 4);
        let err = store.save(b"too long").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::PayloadTooLarge { size: 8, limit: 4 })
        ));
        let err = store.save(b"").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_foreign_keys() {
        let dir = TempDir::new().unwrap();
        let store = AttachmentStore::new(dir.path(), 1024);
        assert!(store.read("../etc/passwd").await.is_err());
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a.png", None), "image/png");
        assert_eq!(content_type_for("a.png", Some("application/octet-stream")), "image/png");
        assert_eq!(content_type_for("a.bin", Some("text/csv")), "text/csv");
        assert_eq!(content_type_for("noext", None), "application/octet-stream");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("../../secret.txt"), "secret.txt");
        assert_eq!(sanitize_file_name("C:\\docs\\plan\".pdf"), "plan.pdf");
        assert_eq!(sanitize_file_name(".."), "attachment");
        assert_eq!(sanitize_file_name(""), "attachment");
    }
}

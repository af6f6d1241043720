//! Blob storage for avatars and attachments.
//!
//! The core only ever needs a public URL back from an upload; the bytes are
//! opaque to it.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{Result, StoreError};

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` at `path` (overwriting) and return its public URL.
    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<String>;

    /// Remove the blob at `path`. Returns `false` if nothing was there.
    async fn delete(&self, path: &str) -> Result<bool>;

    /// Paths of the blobs directly under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Reject absolute paths and `..` so a blob can never land outside the base.
fn relative_path(path: &str) -> Result<PathBuf> {
    let candidate = Path::new(path);
    let mut resolved = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::CurDir => {}
            _ => return Err(StoreError::InvalidPath(path.to_string())),
        }
    }
    Ok(resolved)
}

/// Blob store on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    base_path: PathBuf,
    base_url: String,
    max_size: usize,
}

impl FsBlobStore {
    pub async fn new(base_path: PathBuf, base_url: &str, max_size: usize) -> Result<Self> {
        fs::create_dir_all(&base_path).await?;

        info!(path = %base_path.display(), "Blob store initialized");

        Ok(Self {
            base_path,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn url_for(&self, relative: &Path) -> String {
        let joined = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}", self.base_url, joined)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<String> {
        if bytes.len() > self.max_size {
            return Err(StoreError::BlobTooLarge {
                size: bytes.len(),
                max: self.max_size,
            });
        }
        let relative = relative_path(path)?;
        if relative.as_os_str().is_empty() {
            return Err(StoreError::InvalidPath(path.to_string()));
        }

        let target = self.base_path.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, bytes).await?;

        debug!(path = %relative.display(), size = bytes.len(), "Blob stored");
        Ok(self.url_for(&relative))
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let target = self.base_path.join(relative_path(path)?);
        match fs::remove_file(&target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let relative = relative_path(prefix)?;
        let dir = self.base_path.join(&relative);

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                let name = entry.file_name().to_string_lossy().to_string();
                paths.push(if relative.as_os_str().is_empty() {
                    name
                } else {
                    format!("{}/{}", prefix.trim_end_matches('/'), name)
                });
            }
        }
        paths.sort();
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store(max: usize) -> (tempfile::TempDir, FsBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().join("blobs"), "https://cdn.example.org/", max)
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn upload_list_delete() {
        let (_dir, store) = store(1024).await;

        let url = store.upload("avatars/u1/a.png", b"png").await.unwrap();
        assert_eq!(url, "https://cdn.example.org/avatars/u1/a.png");
        store.upload("avatars/u1/b.png", b"png").await.unwrap();

        assert_eq!(
            store.list("avatars/u1").await.unwrap(),
            vec!["avatars/u1/a.png", "avatars/u1/b.png"]
        );
        assert!(store.delete("avatars/u1/a.png").await.unwrap());
        assert!(!store.delete("avatars/u1/a.png").await.unwrap());
        assert!(store.list("nothing/here").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_traversal_and_oversize() {
        let (_dir, store) = store(4).await;

        assert!(matches!(
            store.upload("../escape", b"x").await,
            Err(StoreError::InvalidPath(_))
        ));
        assert!(matches!(
            store.upload("/etc/passwd", b"x").await,
            Err(StoreError::InvalidPath(_))
        ));
        assert!(matches!(
            store.upload("big.bin", b"too large").await,
            Err(StoreError::BlobTooLarge { .. })
        ));
    }
}

//! Blob storage abstraction
//!
//! Documents and comparison results live outside the relational store; rows
//! keep only the opaque URL returned by `put`.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

const FILE_SCHEME: &str = "file://";
const MEMORY_SCHEME: &str = "memory://";

/// Byte storage addressed by caller-chosen keys
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous content, and return
    /// the URL that `get` accepts
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String>;

    async fn get(&self, url: &str) -> Result<Vec<u8>>;

    /// Remove the blob at `url`; `false` if there was nothing to remove
    async fn delete(&self, url: &str) -> Result<bool>;
}

/// Keys are single path segments: no separators, no leading dot
fn check_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));

    if valid {
        Ok(())
    } else {
        Err(AppError::validation(
            format!("invalid blob key '{}'", key),
            Some("key"),
        ))
    }
}

/// Files under a local directory, addressed by `file://` URLs
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn canonical_root(&self) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(tokio::fs::canonicalize(&self.root).await?)
    }

    /// Path behind a `file://` URL, `None` if no such file exists
    async fn resolve(&self, url: &str) -> Result<Option<PathBuf>> {
        let raw = url.strip_prefix(FILE_SCHEME).ok_or_else(|| AppError::Storage {
            message: format!("not a file URL: {}", url),
        })?;

        let root = self.canonical_root().await?;
        let path = match tokio::fs::canonicalize(raw).await {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if !path.starts_with(&root) {
            return Err(AppError::Storage {
                message: format!("{} is outside the blob directory", url),
            });
        }

        Ok(Some(path))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        check_key(key)?;
        let root = self.canonical_root().await?;
        let path = root.join(key);

        // Write then rename so readers never see a partial file
        let staging = root.join(format!(".{}.{}", key, uuid::Uuid::new_v4()));
        tokio::fs::write(&staging, bytes).await?;
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        debug!(key, size = bytes.len(), "Blob stored");
        Ok(format!("{}{}", FILE_SCHEME, path.display()))
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        let path = self
            .resolve(url)
            .await?
            .ok_or_else(|| AppError::not_found("blob", url))?;

        Ok(tokio::fs::read(&path).await?)
    }

    async fn delete(&self, url: &str) -> Result<bool> {
        let Some(path) = self.resolve(url).await? else {
            return Ok(false);
        };

        tokio::fs::remove_file(&path).await?;
        debug!(url, "Blob deleted");
        Ok(true)
    }
}

/// Process-local blobs for tests and the in-memory backend
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        check_key(key)?;
        let mut blobs = self.blobs.lock().map_err(|_| AppError::Internal {
            message: "blob store lock poisoned".to_string(),
        })?;
        blobs.insert(key.to_string(), bytes.to_vec());
        Ok(format!("{}{}", MEMORY_SCHEME, key))
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        let key = url.strip_prefix(MEMORY_SCHEME).ok_or_else(|| AppError::Storage {
            message: format!("not a memory URL: {}", url),
        })?;
        let blobs = self.blobs.lock().map_err(|_| AppError::Internal {
            message: "blob store lock poisoned".to_string(),
        })?;
        blobs
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::not_found("blob", url))
    }

    async fn delete(&self, url: &str) -> Result<bool> {
        let key = url.strip_prefix(MEMORY_SCHEME).ok_or_else(|| AppError::Storage {
            message: format!("not a memory URL: {}", url),
        })?;
        let mut blobs = self.blobs.lock().map_err(|_| AppError::Internal {
            message: "blob store lock poisoned".to_string(),
        })?;
        Ok(blobs.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("redline-blobs-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_local_put_get() {
        let dir = scratch_dir();
        let store = LocalBlobStore::new(&dir);

        let url = store.put("abc.txt", b"hello").await.unwrap();
        assert!(url.starts_with("file://"));
        assert_eq!(store.get(&url).await.unwrap(), b"hello");

        let again = store.put("abc.txt", b"replaced").await.unwrap();
        assert_eq!(again, url);
        assert_eq!(store.get(&url).await.unwrap(), b"replaced");

        assert!(store.delete(&url).await.unwrap());
        assert!(!store.delete(&url).await.unwrap());
        assert!(store.get(&url).await.unwrap_err().is_not_found());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_local_rejects_escaping_keys_and_urls() {
        let dir = scratch_dir();
        let store = LocalBlobStore::new(&dir);

        assert!(store.put("../evil", b"x").await.is_err());
        assert!(store.put("a/b", b"x").await.is_err());
        assert!(store.put(".hidden", b"x").await.is_err());

        let outside = std::env::temp_dir().join(format!("redline-outside-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&outside, b"secret").await.unwrap();
        let err = store
            .get(&format!("file://{}", outside.display()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Storage { .. }));

        let missing = format!("file://{}/nope.txt", dir.display());
        assert!(store.get(&missing).await.unwrap_err().is_not_found());

        tokio::fs::remove_file(&outside).await.unwrap();
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryBlobStore::new();
        let url = store.put("k.json", b"{}").await.unwrap();
        assert_eq!(url, "memory://k.json");
        assert_eq!(store.get(&url).await.unwrap(), b"{}");
        assert!(store.get("memory://other").await.unwrap_err().is_not_found());
        assert!(store.get("file:///k.json").await.is_err());
        assert_eq!(store.len(), 1);
    }
}

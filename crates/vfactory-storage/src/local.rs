//! Local filesystem storage.
//!
//! Used when no remote credentials are configured. Locators are absolute
//! file paths; writes land in a temporary sibling and are renamed into place
//! so a reader never observes a partial artifact.

use std::path::{Component, Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::gateway::{content_type_for, FileInfo, StorageGateway};
use crate::retry::{with_retry, RetryPolicy};

const BACKEND: &str = "local";

/// Filesystem-backed artifact storage rooted at one directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    retry: RetryPolicy,
}

impl LocalStorage {
    /// Create storage rooted at `root` (made absolute, created if missing).
    pub fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()?.join(root)
        };
        std::fs::create_dir_all(&root)?;

        Ok(Self {
            root,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a storage key below the root, rejecting escapes.
    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::invalid_locator(key));
        }
        Ok(self.root.join(relative))
    }

    /// Resolve a locator: absolute paths as-is, anything else as a key.
    fn locator_path(&self, locator: &str) -> StorageResult<PathBuf> {
        let path = Path::new(locator);
        if path.is_absolute() {
            if path.components().any(|c| matches!(c, Component::ParentDir)) {
                return Err(StorageError::invalid_locator(locator));
            }
            Ok(path.to_path_buf())
        } else {
            self.key_path(locator)
        }
    }
}

/// Copy `src` next to `dst` and rename into place.
async fn copy_atomic(src: &Path, dst: &Path) -> std::io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    let file_name = dst
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = dst.with_file_name(format!(".{}.partial", file_name));

    if let Err(e) = fs::copy(src, &tmp).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp, dst).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

#[async_trait]
impl StorageGateway for LocalStorage {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn download(&self, locator: &str, local_path: &Path) -> StorageResult<()> {
        let source = self.locator_path(locator)?;
        debug!(locator = %locator, "Downloading {} to {}", source.display(), local_path.display());

        let source = &source;
        with_retry(&self.retry, BACKEND, "download", || async move {
            if !fs::try_exists(source).await.unwrap_or(false) {
                return Err(StorageError::not_found(locator));
            }
            copy_atomic(source, local_path)
                .await
                .map_err(|e| StorageError::from_io(e, locator))
        })
        .await
    }

    async fn upload(&self, local_path: &Path, key: &str) -> StorageResult<String> {
        let dest = self.key_path(key)?;

        let dest = &dest;
        with_retry(&self.retry, BACKEND, "upload", || async move {
            copy_atomic(local_path, dest)
                .await
                .map_err(|e| StorageError::from_io(e, &local_path.to_string_lossy()))
        })
        .await?;

        let locator = dest.to_string_lossy().to_string();
        info!(locator = %locator, "Uploaded {}", local_path.display());
        Ok(locator)
    }

    async fn delete(&self, locator: &str) -> StorageResult<bool> {
        let path = self.locator_path(locator)?;

        let path = &path;
        with_retry(&self.retry, BACKEND, "delete", || async move {
            match fs::remove_file(path).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(StorageError::from_io(e, locator)),
            }
        })
        .await
    }

    async fn exists(&self, locator: &str) -> StorageResult<bool> {
        let path = self.locator_path(locator)?;
        Ok(fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false))
    }

    /// A `file://` URL of the stored file. Local files do not expire, so
    /// `expires_in` is ignored.
    async fn download_url(&self, locator: &str, _expires_in: Duration) -> StorageResult<String> {
        let path = self.locator_path(locator)?;
        if !self.exists(locator).await? {
            return Err(StorageError::not_found(locator));
        }
        Ok(format!("file://{}", path.display()))
    }

    async fn file_info(&self, locator: &str) -> StorageResult<FileInfo> {
        let path = self.locator_path(locator)?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| StorageError::from_io(e, locator))?;
        if !metadata.is_file() {
            return Err(StorageError::not_found(locator));
        }

        Ok(FileInfo {
            size: metadata.len(),
            last_modified: metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64),
            content_type: Some(content_type_for(&path).to_string()),
            etag: None,
        })
    }
}

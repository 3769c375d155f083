//! Storage gateway contract and backend selection.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::StorageResult;
use crate::local::LocalStorage;
use crate::s3::{S3Config, S3Storage};

/// Metadata of a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Size in bytes
    pub size: u64,
    /// Last modified timestamp (milliseconds since epoch)
    pub last_modified: Option<u64>,
    pub content_type: Option<String>,
    /// Entity tag without surrounding quotes (remote backends only)
    pub etag: Option<String>,
}

/// Moves job artifacts between the workspace and durable storage.
///
/// Locators returned by [`upload`](StorageGateway::upload) are opaque to
/// callers; they are only ever passed back into this trait.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Backend name for logging.
    fn backend(&self) -> &'static str;

    /// Fetch the artifact at `locator` into `local_path`.
    async fn download(&self, locator: &str, local_path: &Path) -> StorageResult<()>;

    /// Store `local_path` under `key` and return its locator.
    async fn upload(&self, local_path: &Path, key: &str) -> StorageResult<String>;

    /// Remove the artifact; `false` when nothing was stored there.
    async fn delete(&self, locator: &str) -> StorageResult<bool>;

    async fn exists(&self, locator: &str) -> StorageResult<bool>;

    /// URL a client can fetch the artifact from, valid for `expires_in`.
    async fn download_url(&self, locator: &str, expires_in: Duration) -> StorageResult<String>;

    /// Size and metadata of the artifact; not-found when nothing is stored.
    async fn file_info(&self, locator: &str) -> StorageResult<FileInfo>;
}

/// Content type recorded for an artifact, by file extension.
pub(crate) fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp4" | "m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("srt") => "application/x-subrip",
        _ => "application/octet-stream",
    }
}

/// Pick the backend from the environment.
///
/// Remote storage when all `WASABI_*` credentials are set, local storage
/// under `local_root` when none are. A partial configuration is an error.
pub async fn gateway_from_env(local_root: impl Into<PathBuf>) -> StorageResult<Arc<dyn StorageGateway>> {
    match S3Config::from_env()? {
        Some(config) => {
            info!(endpoint = %config.endpoint_url, bucket = %config.bucket, "Using S3-compatible storage");
            Ok(Arc::new(S3Storage::new(config).await?))
        }
        None => {
            let storage = LocalStorage::new(local_root)?;
            info!(root = %storage.root().display(), "Remote storage not configured, using local storage");
            Ok(Arc::new(storage))
        }
    }
}

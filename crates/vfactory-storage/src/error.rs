//! Storage error types.

use std::io::ErrorKind;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to configure storage client: {0}")]
    ConfigError(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Network-class failure (timeout, connection reset, throttling, 5xx).
    #[error("Transient storage failure: {0}")]
    Transient(String),

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    #[error("Failed to presign request: {0}")]
    PresignFailed(String),

    #[error("Storage request failed: {0}")]
    RequestFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn not_found(locator: impl Into<String>) -> Self {
        Self::NotFound(locator.into())
    }

    pub fn access_denied(locator: impl Into<String>) -> Self {
        Self::AccessDenied(locator.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn invalid_locator(locator: impl Into<String>) -> Self {
        Self::InvalidLocator(locator.into())
    }

    /// Map a filesystem error touching `locator` to the storage taxonomy.
    pub fn from_io(err: std::io::Error, locator: &str) -> Self {
        match err.kind() {
            ErrorKind::NotFound => Self::not_found(locator),
            ErrorKind::PermissionDenied => Self::access_denied(locator),
            _ => Self::Io(err),
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Transient(_) => true,
            StorageError::Io(e) => matches!(
                e.kind(),
                ErrorKind::TimedOut
                    | ErrorKind::Interrupted
                    | ErrorKind::WouldBlock
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// Not-found and access-denied: never retried, surfaced immediately.
    pub fn is_permanent(&self) -> bool {
        !self.is_retryable()
    }
}

//! Artifact storage for the video pipeline.
//!
//! This crate provides:
//! - The [`StorageGateway`] contract used by the orchestrator
//! - An S3-compatible backend (Wasabi, R2, MinIO)
//! - A local filesystem fallback with identical semantics
//! - Bounded exponential-backoff retry for transient failures

pub mod error;
pub mod gateway;
pub mod local;
pub mod metrics;
pub mod retry;
pub mod s3;

pub use error::{StorageError, StorageResult};
pub use gateway::{gateway_from_env, FileInfo, StorageGateway};
pub use local::LocalStorage;
pub use retry::{with_retry, RetryPolicy};
pub use s3::{S3Config, S3Storage};

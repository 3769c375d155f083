//! Shared data models for the video factory pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Processing jobs and their identifiers
//! - The job status state machine
//! - Metadata describing a processed video

pub mod error;
pub mod job;
pub mod job_status;
pub mod metadata;

// Re-export common types
pub use error::{ModelError, ModelResult};
pub use job::{JobId, JobStatusView, ProcessingJob};
pub use job_status::JobStatus;
pub use metadata::ProcessedMetadata;

//! Video pipeline worker.
//!
//! This crate provides:
//! - The pipeline orchestrator (download, auto-edit, transcribe, burn-in, upload)
//! - Per-job temp workspaces with guaranteed cleanup
//! - Job stores (in-memory and file-backed)
//! - A polling job executor with bounded concurrency and graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod job_store;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod workspace;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use job_store::{FileJobStore, InMemoryJobStore, JobStore};
pub use logging::JobLogger;
pub use orchestrator::{output_key, sanitize_filename, Pipeline, Step, StepFailure};
pub use workspace::{Workspace, WorkspaceError, WorkspaceManager};

//! Worker error types.

use thiserror::Error;

use vfactory_models::{JobId, JobStatus, ModelError};

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job already exists: {0}")]
    JobExists(JobId),

    #[error("Job {job_id} is {status}, expected {expected}")]
    WrongState {
        job_id: JobId,
        status: JobStatus,
        expected: JobStatus,
    },

    #[error("Job rejected: {0}")]
    Model(#[from] ModelError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether the job was handed over in a state the pipeline does not accept.
    pub fn is_rejection(&self) -> bool {
        matches!(self, WorkerError::WrongState { .. } | WorkerError::JobNotFound(_))
    }
}

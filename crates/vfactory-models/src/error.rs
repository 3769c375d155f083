//! Model invariant errors.

use thiserror::Error;

use crate::job_status::JobStatus;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Violations of the processing job invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Job is already {0} and can no longer change")]
    Terminal(JobStatus),

    #[error("Progress cannot go backwards ({current} -> {requested})")]
    ProgressRegression { current: u8, requested: u8 },

    #[error("Progress out of range: {0}")]
    ProgressOutOfRange(u8),

    #[error("Missing output reference")]
    MissingOutputReference,

    #[error("Invalid job id: {0}")]
    InvalidJobId(String),
}

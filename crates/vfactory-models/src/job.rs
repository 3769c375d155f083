//! Processing job record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};
use crate::job_status::JobStatus;
use crate::metadata::ProcessedMetadata;

/// Message recorded when a failure carries no usable text.
const FALLBACK_ERROR_MESSAGE: &str = "Processing failed for an unknown reason";

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id can be used verbatim as a single path component.
    ///
    /// Workspaces and file-backed stores are namespaced by job id, so ids
    /// containing separators or dots would escape their directory.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= 128
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    /// Validate the id for use as a path component.
    pub fn validate(&self) -> ModelResult<()> {
        if self.is_path_safe() {
            Ok(())
        } else {
            Err(ModelError::InvalidJobId(self.0.clone()))
        }
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One upload-to-output workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingJob {
    /// Unique job ID
    pub id: JobId,

    /// Owning user
    pub owner_id: String,

    /// Filename as uploaded
    pub original_filename: String,

    /// Current status
    pub status: JobStatus,

    /// Progress (0-100)
    #[serde(default)]
    pub progress: u8,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Set when the job reaches a terminal state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Error message (only when failed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Locator of the uploaded source artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_reference: Option<String>,

    /// Locator of the processed artifact (only when completed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_reference: Option<String>,

    /// Information about the processed artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_metadata: Option<ProcessedMetadata>,
}

impl ProcessingJob {
    /// Create a freshly uploaded job.
    pub fn new(
        owner_id: impl Into<String>,
        original_filename: impl Into<String>,
        input_reference: impl Into<String>,
    ) -> Self {
        Self {
            id: JobId::new(),
            owner_id: owner_id.into(),
            original_filename: original_filename.into(),
            status: JobStatus::Uploaded,
            progress: 0,
            created_at: Utc::now(),
            completed_at: None,
            error_message: None,
            input_reference: Some(input_reference.into()),
            output_reference: None,
            processed_metadata: None,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The input reference, if present and non-blank.
    pub fn valid_input_reference(&self) -> Option<&str> {
        self.input_reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    /// Move to `status` with `progress`.
    ///
    /// Covers every non-terminal transition; use [`complete`](Self::complete)
    /// and [`fail`](Self::fail) for the terminal ones.
    pub fn advance(&mut self, status: JobStatus, progress: u8) -> ModelResult<()> {
        self.ensure_mutable()?;

        if status == JobStatus::Completed {
            return Err(ModelError::MissingOutputReference);
        }
        if status == JobStatus::Failed || !self.status.can_transition_to(status) {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: status,
            });
        }
        if progress > 100 {
            return Err(ModelError::ProgressOutOfRange(progress));
        }
        if progress < self.progress {
            return Err(ModelError::ProgressRegression {
                current: self.progress,
                requested: progress,
            });
        }

        self.status = status;
        self.progress = progress;
        Ok(())
    }

    /// Mark job as completed with the locator of its output.
    pub fn complete(&mut self, output_reference: impl Into<String>) -> ModelResult<()> {
        self.ensure_mutable()?;

        if !self.status.can_transition_to(JobStatus::Completed) {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: JobStatus::Completed,
            });
        }

        let output_reference = output_reference.into();
        if output_reference.trim().is_empty() {
            return Err(ModelError::MissingOutputReference);
        }

        self.status = JobStatus::Completed;
        self.progress = 100;
        self.output_reference = Some(output_reference);
        self.error_message = None;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark job as failed. Progress stays where the failing stage left it.
    pub fn fail(&mut self, message: impl Into<String>) -> ModelResult<()> {
        self.ensure_mutable()?;

        let message = message.into();
        let message = if message.trim().is_empty() {
            FALLBACK_ERROR_MESSAGE.to_string()
        } else {
            message
        };

        self.status = JobStatus::Failed;
        self.error_message = Some(message);
        self.output_reference = None;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Re-point the output of a completed job.
    pub fn set_output_reference(&mut self, reference: impl Into<String>) -> ModelResult<()> {
        if self.status != JobStatus::Completed {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: JobStatus::Completed,
            });
        }
        let reference = reference.into();
        if reference.trim().is_empty() {
            return Err(ModelError::MissingOutputReference);
        }
        self.output_reference = Some(reference);
        Ok(())
    }

    /// Attach metadata about the processed output.
    pub fn set_processed_metadata(&mut self, metadata: ProcessedMetadata) -> ModelResult<()> {
        if self.status == JobStatus::Failed {
            return Err(ModelError::Terminal(self.status));
        }
        self.processed_metadata = Some(metadata);
        Ok(())
    }

    /// Snapshot for status polling.
    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.id.clone(),
            status: self.status,
            status_display: self.status.display_label().to_string(),
            progress: self.progress,
            error_message: self.error_message.clone(),
            completed: self.is_terminal(),
        }
    }

    fn ensure_mutable(&self) -> ModelResult<()> {
        if self.is_terminal() {
            Err(ModelError::Terminal(self.status))
        } else {
            Ok(())
        }
    }
}

/// Polling snapshot of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub status_display: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub completed: bool,
}

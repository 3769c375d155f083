//! Job status state machine.
//!
//! Jobs move strictly forward through
//! `uploaded -> auto_editing -> transcribing -> adding_subtitles -> completed`,
//! with a side exit to `failed` from any non-terminal state.

use serde::{Deserialize, Serialize};

/// Job processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Input stored, waiting for a worker
    #[default]
    Uploaded,
    /// Silent segments are being removed
    AutoEditing,
    /// Speech is being transcribed into subtitles
    Transcribing,
    /// Subtitles are being burned into the video
    AddingSubtitles,
    /// Output uploaded and available
    Completed,
    /// Processing failed with an error
    Failed,
}

impl JobStatus {
    /// Statuses in pipeline order (excluding `Failed`).
    pub const PIPELINE: [JobStatus; 5] = [
        JobStatus::Uploaded,
        JobStatus::AutoEditing,
        JobStatus::Transcribing,
        JobStatus::AddingSubtitles,
        JobStatus::Completed,
    ];

    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploaded => "uploaded",
            JobStatus::AutoEditing => "auto_editing",
            JobStatus::Transcribing => "transcribing",
            JobStatus::AddingSubtitles => "adding_subtitles",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Human readable label shown while polling.
    pub fn display_label(&self) -> &'static str {
        match self {
            JobStatus::Uploaded => "Uploaded",
            JobStatus::AutoEditing => "Auto-editing video...",
            JobStatus::Transcribing => "Generating subtitles...",
            JobStatus::AddingSubtitles => "Adding subtitles...",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// The next status on the success path.
    pub fn next(&self) -> Option<JobStatus> {
        match self {
            JobStatus::Uploaded => Some(JobStatus::AutoEditing),
            JobStatus::AutoEditing => Some(JobStatus::Transcribing),
            JobStatus::Transcribing => Some(JobStatus::AddingSubtitles),
            JobStatus::AddingSubtitles => Some(JobStatus::Completed),
            JobStatus::Completed | JobStatus::Failed => None,
        }
    }

    /// Whether a job may move from `self` to `to`.
    ///
    /// Staying on the same non-terminal status is allowed so progress can
    /// advance within a stage.
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == *self || to == JobStatus::Failed || self.next() == Some(to)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(JobStatus::Uploaded),
            "auto_editing" => Ok(JobStatus::AutoEditing),
            "transcribing" => Ok(JobStatus::Transcribing),
            "adding_subtitles" => Ok(JobStatus::AddingSubtitles),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

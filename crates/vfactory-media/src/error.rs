//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while running external media tools.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found in PATH")]
    ToolNotFound(String),

    #[error("{tool} exited with {}", describe_exit(.exit_code))]
    ToolFailed {
        tool: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    #[error("{tool} timed out after {secs} seconds")]
    Timeout { tool: String, secs: u64, stderr: String },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Expected output was not produced: {0}")]
    MissingOutput(PathBuf),

    #[error("Invalid subtitle file: {0}")]
    InvalidSubtitles(String),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (killed by signal)".to_string(),
    }
}

impl MediaError {
    /// Create a tool failure error.
    pub fn tool_failed(tool: impl Into<String>, stderr: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Raw diagnostic text captured from the tool, if any.
    pub fn diagnostic(&self) -> &str {
        match self {
            MediaError::ToolFailed { stderr, .. } | MediaError::Timeout { stderr, .. } => stderr,
            MediaError::FfprobeFailed {
                stderr: Some(stderr),
                ..
            } => stderr,
            _ => "",
        }
    }

    /// Check if the error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, MediaError::Timeout { .. })
    }
}

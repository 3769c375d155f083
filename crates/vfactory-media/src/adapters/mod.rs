//! Uniform file-in/file-out contract over the external tools.
//!
//! The orchestrator only sees [`ToolAdapter`]; the three implementations wrap
//! auto-editor, whisper and FFmpeg. Tests substitute their own adapters.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::MediaError;
use crate::probe::VideoInfo;

mod burn_in;
mod silence;
mod transcribe;

pub use burn_in::{escape_filter_path, SubtitleBurner, SubtitleBurnerConfig};
pub use silence::{SilenceRemover, SilenceRemoverConfig};
pub use transcribe::{ModelSize, Transcriber, TranscriberConfig};

/// Max diagnostic characters carried in a failure.
pub const MAX_DIAGNOSTIC_CHARS: usize = 2000;

/// Input handed to an adapter for one stage.
#[derive(Debug, Clone)]
pub struct StageInput {
    /// Media file produced by the previous stage (or the downloaded source)
    pub media: PathBuf,
    /// Subtitle file, for stages that consume one
    pub subtitles: Option<PathBuf>,
    /// Job-private scratch directory for intermediate files
    pub scratch_dir: PathBuf,
}

impl StageInput {
    pub fn new(media: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            media: media.into(),
            subtitles: None,
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn with_subtitles(mut self, subtitles: impl Into<PathBuf>) -> Self {
        self.subtitles = Some(subtitles.into());
        self
    }
}

/// Optional details an adapter reports about its output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdapterMetadata {
    /// Probe of the produced video
    pub video: Option<VideoInfo>,
    /// Number of subtitle cues produced or rendered
    pub cue_count: Option<usize>,
}

/// Successful adapter run.
#[derive(Debug, Clone)]
pub struct AdapterSuccess {
    pub output: PathBuf,
    pub metadata: AdapterMetadata,
}

impl AdapterSuccess {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            metadata: AdapterMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: AdapterMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Failure categories shared by all adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    MissingInput,
    ToolNotFound,
    NonZeroExit,
    Timeout,
    MissingOutput,
    InvalidOutput,
    Io,
}

/// Failed adapter run: a short reason plus the tool's raw diagnostic text.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterFailure {
    pub kind: FailureKind,
    pub reason: String,
    pub diagnostic: String,
}

impl AdapterFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            diagnostic: String::new(),
        }
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = diagnostic.into();
        self
    }

    pub fn missing_input(path: &Path) -> Self {
        Self::new(
            FailureKind::MissingInput,
            format!("input file not found: {}", path.display()),
        )
    }

    pub fn missing_output(path: &Path) -> Self {
        Self::new(
            FailureKind::MissingOutput,
            format!("expected output was not produced: {}", path.display()),
        )
    }

    /// Trailing part of the diagnostic, trimmed and bounded.
    pub fn diagnostic_tail(&self) -> &str {
        let trimmed = self.diagnostic.trim();
        match trimmed.char_indices().rev().nth(MAX_DIAGNOSTIC_CHARS - 1) {
            Some((idx, _)) => &trimmed[idx..],
            None => trimmed,
        }
    }
}

impl fmt::Display for AdapterFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for AdapterFailure {}

impl From<MediaError> for AdapterFailure {
    fn from(err: MediaError) -> Self {
        let kind = match &err {
            MediaError::ToolNotFound(_) => FailureKind::ToolNotFound,
            MediaError::ToolFailed { .. } | MediaError::FfprobeFailed { .. } => FailureKind::NonZeroExit,
            MediaError::Timeout { .. } => FailureKind::Timeout,
            MediaError::FileNotFound(_) => FailureKind::MissingInput,
            MediaError::MissingOutput(_) => FailureKind::MissingOutput,
            MediaError::InvalidSubtitles(_) | MediaError::InvalidVideo(_) | MediaError::JsonParse(_) => {
                FailureKind::InvalidOutput
            }
            MediaError::Io(_) => FailureKind::Io,
        };
        let diagnostic = err.diagnostic().to_string();
        AdapterFailure::new(kind, err.to_string()).with_diagnostic(diagnostic)
    }
}

/// Outcome of one adapter run.
pub type AdapterResult = Result<AdapterSuccess, AdapterFailure>;

/// One pipeline stage backed by an external tool.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Tool name for logging.
    fn name(&self) -> &'static str;

    /// Produce `output` from `input`.
    ///
    /// Implementations must not leave a running subprocess behind on any
    /// return path, and must report a missing output file as a failure.
    async fn run(&self, input: &StageInput, output: &Path) -> AdapterResult;
}

/// Fail unless `path` exists as a regular file.
pub(crate) fn require_input(path: &Path) -> Result<(), AdapterFailure> {
    if path.is_file() {
        Ok(())
    } else {
        Err(AdapterFailure::missing_input(path))
    }
}

/// Fail unless the tool left a non-empty file at `path`.
pub(crate) async fn require_output(path: &Path) -> Result<(), AdapterFailure> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        _ => Err(AdapterFailure::missing_output(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_error_mapping() {
        let failure: AdapterFailure = MediaError::tool_failed("auto-editor", "bad codec", Some(1)).into();
        assert_eq!(failure.kind, FailureKind::NonZeroExit);
        assert_eq!(failure.reason, "auto-editor exited with exit code 1");
        assert_eq!(failure.diagnostic, "bad codec");

        let failure: AdapterFailure = MediaError::Timeout {
            tool: "ffmpeg".into(),
            secs: 300,
            stderr: "frame=  10".into(),
        }
        .into();
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(failure.reason.contains("timed out"));

        let failure: AdapterFailure = MediaError::ToolNotFound("whisper".into()).into();
        assert_eq!(failure.kind, FailureKind::ToolNotFound);
    }

    #[test]
    fn test_diagnostic_tail_is_bounded() {
        let long = format!("{}END", "x".repeat(5000));
        let failure = AdapterFailure::new(FailureKind::NonZeroExit, "boom").with_diagnostic(long);
        let tail = failure.diagnostic_tail();
        assert_eq!(tail.chars().count(), MAX_DIAGNOSTIC_CHARS);
        assert!(tail.ends_with("END"));

        let short = AdapterFailure::new(FailureKind::NonZeroExit, "boom").with_diagnostic("  oops \n");
        assert_eq!(short.diagnostic_tail(), "oops");
    }

    #[tokio::test]
    async fn test_require_output_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        assert_eq!(require_output(&path).await.unwrap_err().kind, FailureKind::MissingOutput);

        tokio::fs::write(&path, b"").await.unwrap();
        assert!(require_output(&path).await.is_err());

        tokio::fs::write(&path, b"data").await.unwrap();
        assert!(require_output(&path).await.is_ok());
    }
}

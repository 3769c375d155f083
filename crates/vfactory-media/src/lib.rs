//! External tool wrappers for the video pipeline.
//!
//! This crate provides:
//! - A subprocess runner with timeouts and guaranteed child termination
//! - Type-safe FFmpeg argument building
//! - FFprobe inspection of media files
//! - SRT subtitle parsing and formatting
//! - The uniform [`ToolAdapter`] contract and its three implementations:
//!   silence removal (auto-editor), transcription (whisper) and subtitle
//!   burn-in (FFmpeg)

pub mod adapters;
pub mod command;
pub mod error;
pub mod probe;
pub mod subtitles;

pub use adapters::{
    AdapterFailure, AdapterMetadata, AdapterResult, AdapterSuccess, FailureKind, ModelSize,
    SilenceRemover, SilenceRemoverConfig, StageInput, SubtitleBurner, SubtitleBurnerConfig,
    ToolAdapter, Transcriber, TranscriberConfig,
};
pub use command::{check_tool, FfmpegCommand, ToolCommand, ToolOutput, ToolRunner};
pub use error::{MediaError, MediaResult};
pub use probe::{has_audio_stream, probe_video, VideoInfo};
pub use subtitles::{format_timestamp, parse_srt, read_srt, to_srt, write_srt, SubtitleCue};

//! Subtitle burn-in with FFmpeg.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, warn};

use super::{
    require_input, require_output, AdapterFailure, AdapterMetadata, AdapterResult, AdapterSuccess,
    FailureKind, StageInput, ToolAdapter,
};
use crate::command::{FfmpegCommand, ToolCommand, ToolRunner};
use crate::error::MediaError;
use crate::probe::probe_video;
use crate::subtitles::read_srt;

/// Configuration for [`SubtitleBurner`].
#[derive(Debug, Clone)]
pub struct SubtitleBurnerConfig {
    /// ffmpeg binary name or path
    pub binary: String,
    /// Keep the source audio track (stream copy); drop it otherwise
    pub preserve_audio: bool,
    /// ASS style override, e.g. `FontSize=24,Outline=2`
    pub force_style: Option<String>,
    pub preset: String,
    pub crf: u8,
    /// Maximum run time
    pub timeout: Duration,
}

impl Default for SubtitleBurnerConfig {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            preserve_audio: true,
            force_style: None,
            preset: "veryfast".to_string(),
            crf: 23,
            timeout: Duration::from_secs(300),
        }
    }
}

/// Renders subtitles into the video frames.
#[derive(Debug, Clone, Default)]
pub struct SubtitleBurner {
    config: SubtitleBurnerConfig,
}

impl SubtitleBurner {
    pub fn new(config: SubtitleBurnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SubtitleBurnerConfig {
        &self.config
    }

    fn subtitles_filter(&self, subtitles: &Path) -> String {
        let mut filter = format!(
            "subtitles={}",
            escape_filter_path(&subtitles.to_string_lossy())
        );
        if let Some(style) = self.config.force_style.as_deref().filter(|s| !s.trim().is_empty()) {
            filter.push_str(&format!(":force_style='{}'", style.replace('\'', "")));
        }
        filter
    }

    fn build_command(&self, video: &Path, subtitles: &Path, output: &Path, cue_count: usize) -> ToolCommand {
        let mut cmd = FfmpegCommand::new(video, output);

        cmd = if cue_count == 0 {
            // Nothing to render
            cmd.video_codec("copy")
        } else {
            cmd.video_filter(self.subtitles_filter(subtitles))
                .video_codec("libx264")
                .preset(self.config.preset.clone())
                .crf(self.config.crf)
        };

        cmd = if self.config.preserve_audio {
            cmd.audio_codec("copy")
        } else {
            cmd.no_audio()
        };

        cmd.into_tool_command(&self.config.binary)
    }
}

#[async_trait]
impl ToolAdapter for SubtitleBurner {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn run(&self, input: &StageInput, output: &Path) -> AdapterResult {
        require_input(&input.media)?;
        let subtitles = input.subtitles.as_deref().ok_or_else(|| {
            AdapterFailure::new(FailureKind::MissingInput, "no subtitle file provided")
        })?;
        require_input(subtitles)?;

        let cues = read_srt(subtitles).await.map_err(|e| match e {
            invalid @ MediaError::InvalidSubtitles(_) => AdapterFailure::new(
                FailureKind::MissingInput,
                format!("unreadable subtitle file: {}", invalid),
            ),
            other => other.into(),
        })?;

        let start = Instant::now();
        ToolRunner::new()
            .with_timeout(self.config.timeout)
            .run(&self.build_command(&input.media, subtitles, output, cues.len()))
            .await?;

        require_output(output).await?;

        let video = match probe_video(output).await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(error = %e, "Could not probe burned-in output");
                None
            }
        };

        info!(
            cues = cues.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Subtitle burn-in finished"
        );
        Ok(AdapterSuccess::new(output).with_metadata(AdapterMetadata {
            video,
            cue_count: Some(cues.len()),
        }))
    }
}

/// Escape a path for use as a filter option inside an `-vf` graph.
///
/// Applies option-level escaping, then graph-level escaping, so that `:`,
/// quotes, brackets and commas in the path survive both parsers.
pub fn escape_filter_path(path: &str) -> String {
    let value = path.replace('\\', "\\\\").replace('\'', "\\'").replace(':', "\\:");

    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '\'' | '[' | ']' | ',' | ';') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

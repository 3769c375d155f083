//! Speech transcription with whisper.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    require_input, AdapterFailure, AdapterMetadata, AdapterResult, AdapterSuccess, FailureKind,
    StageInput, ToolAdapter,
};
use crate::command::{FfmpegCommand, ToolCommand, ToolRunner};
use crate::error::MediaError;
use crate::probe::has_audio_stream;
use crate::subtitles::{parse_srt, write_srt, SubtitleCue};

/// Whisper model size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Tiny,
    #[default]
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        }
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            other => Err(format!(
                "unknown whisper model size '{}' (expected tiny, base, small, medium or large)",
                other
            )),
        }
    }
}

/// Configuration for [`Transcriber`].
#[derive(Debug, Clone)]
pub struct TranscriberConfig {
    /// whisper binary name or path
    pub binary: String,
    /// ffmpeg binary used for audio extraction
    pub ffmpeg_binary: String,
    pub model: ModelSize,
    /// Spoken language hint; auto-detected when unset
    pub language: Option<String>,
    /// Maximum run time for extraction plus transcription
    pub timeout: Duration,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            binary: "whisper".to_string(),
            ffmpeg_binary: "ffmpeg".to_string(),
            model: ModelSize::default(),
            language: None,
            timeout: Duration::from_secs(1800),
        }
    }
}

/// Produces an SRT subtitle file from the speech in a media file.
#[derive(Debug, Clone, Default)]
pub struct Transcriber {
    config: TranscriberConfig,
}

impl Transcriber {
    pub fn new(config: TranscriberConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TranscriberConfig {
        &self.config
    }

    fn extract_audio_command(&self, media: &Path, wav: &Path) -> ToolCommand {
        FfmpegCommand::new(media, wav)
            .no_video()
            .audio_codec("pcm_s16le")
            .output_args(["-ar", "16000", "-ac", "1"])
            .into_tool_command(&self.config.ffmpeg_binary)
    }

    fn whisper_command(&self, wav: &Path, out_dir: &Path) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.config.binary)
            .path_arg(wav)
            .args(["--model", self.config.model.as_str()])
            .args(["--output_format", "srt"])
            .arg("--output_dir")
            .path_arg(out_dir)
            .args(["--verbose", "False"]);

        if let Some(language) = &self.config.language {
            cmd = cmd.arg("--language").arg(language.clone());
        }
        cmd
    }

    fn runner(&self, deadline: Instant) -> ToolRunner {
        ToolRunner::new().with_timeout(deadline.saturating_duration_since(Instant::now()))
    }
}

#[async_trait]
impl ToolAdapter for Transcriber {
    fn name(&self) -> &'static str {
        "whisper"
    }

    async fn run(&self, input: &StageInput, output: &Path) -> AdapterResult {
        require_input(&input.media)?;
        let deadline = Instant::now() + self.config.timeout;

        match has_audio_stream(&input.media).await {
            Ok(false) => {
                info!(media = %input.media.display(), "No audio stream, writing empty subtitles");
                return write_cues(output, Vec::new()).await;
            }
            Ok(true) => {}
            // Extraction below reports the real problem
            Err(e) => warn!(error = %e, "Could not probe audio streams"),
        }

        let wav = input.scratch_dir.join("audio.wav");
        debug!(wav = %wav.display(), "Extracting audio");
        self.runner(deadline)
            .run(&self.extract_audio_command(&input.media, &wav))
            .await?;
        if !wav.is_file() {
            return Err(AdapterFailure::missing_output(&wav));
        }

        let out_dir = input.scratch_dir.join("whisper");
        tokio::fs::create_dir_all(&out_dir)
            .await
            .map_err(MediaError::from)?;

        let start = Instant::now();
        debug!(model = %self.config.model, "Transcribing");
        self.runner(deadline)
            .run(&self.whisper_command(&wav, &out_dir))
            .await?;

        let raw = whisper_output_path(&wav, &out_dir);
        let text = match tokio::fs::read(&raw).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).to_string(),
            Err(_) => return Err(AdapterFailure::missing_output(&raw)),
        };

        let cues = normalize_cues(&text)?;
        info!(
            cues = cues.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Transcription finished"
        );
        write_cues(output, cues).await
    }
}

/// whisper names its output after the input stem.
fn whisper_output_path(wav: &Path, out_dir: &Path) -> PathBuf {
    let stem = wav
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "audio".to_string());
    out_dir.join(format!("{}.srt", stem))
}

/// Parse raw whisper SRT, dropping cues without text.
///
/// Empty input is a valid transcript of a silent clip.
fn normalize_cues(raw: &str) -> Result<Vec<SubtitleCue>, AdapterFailure> {
    let cues = parse_srt(raw).map_err(|e| {
        AdapterFailure::new(FailureKind::InvalidOutput, e.to_string()).with_diagnostic(raw)
    })?;

    Ok(cues
        .into_iter()
        .filter(|c| !c.text.trim().is_empty())
        .enumerate()
        .map(|(i, c)| SubtitleCue {
            index: i + 1,
            text: c
                .text
                .lines()
                .map(str::trim)
                .collect::<Vec<_>>()
                .join("\n"),
            ..c
        })
        .collect())
}

async fn write_cues(output: &Path, cues: Vec<SubtitleCue>) -> AdapterResult {
    let count = cues.len();
    write_srt(output, &cues).await?;

    Ok(AdapterSuccess::new(output).with_metadata(AdapterMetadata {
        video: None,
        cue_count: Some(count),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_size_parsing() {
        assert_eq!("tiny".parse::<ModelSize>().unwrap(), ModelSize::Tiny);
        assert_eq!(" Large ".parse::<ModelSize>().unwrap(), ModelSize::Large);
        assert!("huge".parse::<ModelSize>().is_err());
        assert_eq!(ModelSize::default().to_string(), "base");
    }

    #[test]
    fn test_whisper_command_layout() {
        let transcriber = Transcriber::new(TranscriberConfig {
            model: ModelSize::Small,
            language: Some("en".into()),
            ..Default::default()
        });
        let cmd = transcriber.whisper_command(Path::new("/w/audio.wav"), Path::new("/w/whisper"));
        assert_eq!(cmd.program(), "whisper");
        assert_eq!(
            cmd.get_args(),
            [
                "/w/audio.wav", "--model", "small", "--output_format", "srt", "--output_dir",
                "/w/whisper", "--verbose", "False", "--language", "en"
            ]
        );
    }

    #[test]
    fn test_extract_audio_command() {
        let cmd = Transcriber::default().extract_audio_command(Path::new("in.mp4"), Path::new("audio.wav"));
        let args = cmd.get_args();
        assert!(args.iter().any(|a| a == "-vn"));
        assert!(args.windows(2).any(|w| w == ["-c:a", "pcm_s16le"]));
        assert!(args.windows(2).any(|w| w == ["-ar", "16000"]));
        assert!(args.windows(2).any(|w| w == ["-ac", "1"]));
        assert_eq!(args.last().map(String::as_str), Some("audio.wav"));
    }

    #[test]
    fn test_output_path_follows_stem() {
        assert_eq!(
            whisper_output_path(Path::new("/w/audio.wav"), Path::new("/w/out")),
            PathBuf::from("/w/out/audio.srt")
        );
    }

    #[test]
    fn test_normalize_empty_transcript() {
        assert!(normalize_cues("").unwrap().is_empty());
        assert!(normalize_cues("\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_normalize_drops_blank_cues_and_renumbers() {
        let raw = "1\n00:00:00,000 --> 00:00:01,000\n   \n\n2\n00:00:01,000 --> 00:00:02,000\n  Hello world  \n";
        let cues = normalize_cues(raw).unwrap();
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].index, 1);
        assert_eq!(cues[0].text, "Hello world");
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        let failure = normalize_cues("this is not srt").unwrap_err();
        assert_eq!(failure.kind, FailureKind::InvalidOutput);
    }

    #[tokio::test]
    async fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let failure = Transcriber::default()
            .run(
                &StageInput::new(dir.path().join("missing.mp4"), dir.path()),
                &dir.path().join("subs.srt"),
            )
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::MissingInput);
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg and whisper"]
    async fn test_silent_clip_yields_empty_subtitles() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("silent.mp4");
        let status = std::process::Command::new("ffmpeg")
            .args(["-y", "-v", "error", "-f", "lavfi", "-i", "anullsrc=r=16000:cl=mono", "-t", "3"])
            .arg(&media)
            .status()
            .unwrap();
        assert!(status.success());

        let output = dir.path().join("subs.srt");
        let success = Transcriber::new(TranscriberConfig {
            model: ModelSize::Tiny,
            ..Default::default()
        })
        .run(&StageInput::new(&media, dir.path()), &output)
        .await
        .unwrap();

        assert_eq!(success.metadata.cue_count, Some(0));
        let cues = crate::subtitles::read_srt(&output).await.unwrap();
        assert!(cues.is_empty());
    }
}

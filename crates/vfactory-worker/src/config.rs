//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vfactory_media::{
    ModelSize, SilenceRemoverConfig, SubtitleBurnerConfig, TranscriberConfig,
};

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// How often to look for newly uploaded jobs
    pub poll_interval: Duration,
    /// Whole-job timeout
    pub job_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Root for per-job workspaces
    pub temp_folder: PathBuf,
    /// Root for the local storage fallback
    pub output_folder: PathBuf,
    /// Directory of the file-backed job store
    pub jobs_folder: PathBuf,
    /// Whisper model size name
    pub whisper_model: String,
    pub whisper_binary: String,
    /// Spoken language hint for whisper
    pub whisper_language: Option<String>,
    pub ffmpeg_binary: String,
    pub auto_editor_binary: String,
    /// Seconds of padding kept around speech
    pub silence_margin: f64,
    /// Extra auto-editor arguments
    pub auto_editor_args: Vec<String>,
    pub auto_edit_timeout: Duration,
    pub transcribe_timeout: Duration,
    pub burn_in_timeout: Duration,
    /// Keep the source audio in the final video
    pub preserve_audio: bool,
    /// ASS force_style override for burned-in subtitles
    pub subtitle_style: Option<String>,
    /// Prometheus exporter port (disabled when unset)
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            poll_interval: Duration::from_secs(5),
            job_timeout: Duration::from_secs(3600), // 1 hour
            shutdown_timeout: Duration::from_secs(30),
            temp_folder: PathBuf::from("./data/temp"),
            output_folder: PathBuf::from("./data/output"),
            jobs_folder: PathBuf::from("./data/jobs"),
            whisper_model: "base".to_string(),
            whisper_binary: "whisper".to_string(),
            whisper_language: None,
            ffmpeg_binary: "ffmpeg".to_string(),
            auto_editor_binary: "auto-editor".to_string(),
            silence_margin: 0.2,
            auto_editor_args: Vec::new(),
            auto_edit_timeout: Duration::from_secs(900),
            transcribe_timeout: Duration::from_secs(1800),
            burn_in_timeout: Duration::from_secs(300),
            preserve_audio: true,
            subtitle_style: None,
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create config from an arbitrary variable source.
    ///
    /// Unset or unparseable values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let parse = |name: &str| get(name).and_then(|v| v.parse().ok());
        let secs = |name: &str, default: Duration| parse(name).map(Duration::from_secs).unwrap_or(default);

        Self {
            max_concurrent_jobs: get("WORKER_MAX_JOBS").and_then(|v| v.parse().ok()).unwrap_or(defaults.max_concurrent_jobs),
            poll_interval: secs("WORKER_POLL_INTERVAL_SECS", defaults.poll_interval),
            job_timeout: secs("WORKER_JOB_TIMEOUT_SECS", defaults.job_timeout),
            shutdown_timeout: secs("WORKER_SHUTDOWN_TIMEOUT_SECS", defaults.shutdown_timeout),
            temp_folder: get("TEMP_FOLDER").map(PathBuf::from).unwrap_or(defaults.temp_folder),
            output_folder: get("OUTPUT_FOLDER").map(PathBuf::from).unwrap_or(defaults.output_folder),
            jobs_folder: get("JOBS_FOLDER").map(PathBuf::from).unwrap_or(defaults.jobs_folder),
            whisper_model: get("WHISPER_MODEL").unwrap_or(defaults.whisper_model),
            whisper_binary: get("WHISPER_BINARY").unwrap_or(defaults.whisper_binary),
            whisper_language: get("WHISPER_LANGUAGE"),
            ffmpeg_binary: get("FFMPEG_BINARY").unwrap_or(defaults.ffmpeg_binary),
            auto_editor_binary: get("AUTO_EDITOR_BINARY").unwrap_or(defaults.auto_editor_binary),
            silence_margin: get("SILENCE_MARGIN").and_then(|v| v.parse().ok()).unwrap_or(defaults.silence_margin),
            auto_editor_args: get("AUTO_EDITOR_ARGS")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            auto_edit_timeout: secs("AUTO_EDIT_TIMEOUT_SECS", defaults.auto_edit_timeout),
            transcribe_timeout: secs("TRANSCRIBE_TIMEOUT_SECS", defaults.transcribe_timeout),
            burn_in_timeout: secs("BURN_IN_TIMEOUT_SECS", defaults.burn_in_timeout),
            preserve_audio: get("PRESERVE_AUDIO")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.preserve_audio),
            subtitle_style: get("SUBTITLE_STYLE"),
            metrics_port: get("METRICS_PORT").and_then(|v| v.parse().ok()),
        }
    }

    /// Reject values the worker cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(WorkerError::config_error("WORKER_MAX_JOBS must be at least 1"));
        }
        if !self.silence_margin.is_finite() || self.silence_margin < 0.0 {
            return Err(WorkerError::config_error(format!(
                "SILENCE_MARGIN must be a non-negative number of seconds, got {}",
                self.silence_margin
            )));
        }
        self.model_size()?;

        for (name, value) in [
            ("WORKER_POLL_INTERVAL_SECS", self.poll_interval),
            ("WORKER_JOB_TIMEOUT_SECS", self.job_timeout),
            ("AUTO_EDIT_TIMEOUT_SECS", self.auto_edit_timeout),
            ("TRANSCRIBE_TIMEOUT_SECS", self.transcribe_timeout),
            ("BURN_IN_TIMEOUT_SECS", self.burn_in_timeout),
        ] {
            if value.is_zero() {
                return Err(WorkerError::config_error(format!("{} must be greater than 0", name)));
            }
        }
        Ok(())
    }

    pub fn model_size(&self) -> WorkerResult<ModelSize> {
        ModelSize::from_str(&self.whisper_model).map_err(WorkerError::config_error)
    }

    pub fn silence_remover(&self) -> SilenceRemoverConfig {
        SilenceRemoverConfig {
            binary: self.auto_editor_binary.clone(),
            margin_secs: self.silence_margin,
            extra_args: self.auto_editor_args.clone(),
            timeout: self.auto_edit_timeout,
        }
    }

    pub fn transcriber(&self) -> WorkerResult<TranscriberConfig> {
        Ok(TranscriberConfig {
            binary: self.whisper_binary.clone(),
            ffmpeg_binary: self.ffmpeg_binary.clone(),
            model: self.model_size()?,
            language: self.whisper_language.clone(),
            timeout: self.transcribe_timeout,
        })
    }

    pub fn subtitle_burner(&self) -> SubtitleBurnerConfig {
        SubtitleBurnerConfig {
            binary: self.ffmpeg_binary.clone(),
            preserve_audio: self.preserve_audio,
            force_style: self.subtitle_style.clone(),
            timeout: self.burn_in_timeout,
            ..Default::default()
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

//! FFprobe video information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use vfactory_models::ProcessedMetadata;

use crate::command::{ToolCommand, ToolRunner};
use crate::error::{MediaError, MediaResult};

const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Video file information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate (fps)
    pub fps: f64,
    /// Video codec
    pub codec: String,
    /// Container format
    pub format: String,
    /// File size in bytes
    pub size: u64,
    /// Bitrate in bits/second
    pub bitrate: u64,
    /// Whether an audio stream is present
    pub has_audio: bool,
}

impl From<VideoInfo> for ProcessedMetadata {
    fn from(info: VideoInfo) -> Self {
        ProcessedMetadata {
            duration_secs: info.duration,
            size_bytes: info.size,
            format: non_empty(info.format),
            bitrate: info.bitrate,
            width: info.width,
            height: info.height,
            fps: info.fps,
            codec: non_empty(info.codec),
            has_audio: info.has_audio,
            subtitle_cues: None,
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

/// Probe a video file for information.
pub async fn probe_video(path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    let stdout = run_ffprobe(path.as_ref()).await?;
    parse_probe_output(stdout.as_bytes())
}

/// Check whether a media file carries at least one audio stream.
///
/// Unlike [`probe_video`] this accepts audio-only files.
pub async fn has_audio_stream(path: impl AsRef<Path>) -> MediaResult<bool> {
    let stdout = run_ffprobe(path.as_ref()).await?;
    let probe: FfprobeOutput = serde_json::from_slice(stdout.as_bytes())?;
    Ok(probe.streams.iter().any(|s| s.codec_type == "audio"))
}

async fn run_ffprobe(path: &Path) -> MediaResult<String> {
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let cmd = ToolCommand::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .path_arg(path);

    let output = ToolRunner::new()
        .with_timeout(PROBE_TIMEOUT)
        .run(&cmd)
        .await
        .map_err(|e| match e {
            missing @ MediaError::ToolNotFound(_) => missing,
            other => MediaError::FfprobeFailed {
                message: other.to_string(),
                stderr: Some(other.diagnostic().to_string()),
            },
        })?;

    Ok(output.stdout)
}

fn parse_probe_output(json: &[u8]) -> MediaResult<VideoInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;

    // Find video stream
    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::InvalidVideo("No video stream found".to_string()))?;

    let has_audio = probe.streams.iter().any(|s| s.codec_type == "audio");

    let duration = probe
        .format
        .duration
        .as_ref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let size = probe
        .format
        .size
        .as_ref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let bitrate = probe
        .format
        .bit_rate
        .as_ref()
        .and_then(|b| b.parse::<u64>().ok())
        .unwrap_or(0);

    // ffprobe reports e.g. "mov,mp4,m4a,3gp,3g2,mj2"
    let format = probe
        .format
        .format_name
        .as_deref()
        .and_then(|f| f.split(',').next())
        .unwrap_or_default()
        .to_string();

    let fps = video_stream
        .avg_frame_rate
        .as_ref()
        .and_then(|r| parse_frame_rate(r))
        .or_else(|| video_stream.r_frame_rate.as_ref().and_then(|r| parse_frame_rate(r)))
        .unwrap_or(0.0);

    Ok(VideoInfo {
        duration,
        width: video_stream.width.unwrap_or(0),
        height: video_stream.height.unwrap_or(0),
        fps,
        codec: video_stream.codec_name.clone().unwrap_or_default(),
        format,
        size,
        bitrate,
        has_audio,
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
             "r_frame_rate": "30/1", "avg_frame_rate": "30000/1001"},
            {"codec_type": "audio", "codec_name": "aac"}
        ],
        "format": {"format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "12.500000",
                   "size": "1048576", "bit_rate": "671088"}
    }"#;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert!(parse_frame_rate("0/0").is_none());
    }

    #[test]
    fn test_parse_probe_output() {
        let info = parse_probe_output(SAMPLE.as_bytes()).unwrap();
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert_eq!(info.codec, "h264");
        assert_eq!(info.format, "mov");
        assert_eq!(info.size, 1_048_576);
        assert!((info.duration - 12.5).abs() < f64::EPSILON);
        assert!((info.fps - 29.97).abs() < 0.01);
        assert!(info.has_audio);
    }

    #[test]
    fn test_audio_only_file_is_invalid_video() {
        let json = r#"{"streams": [{"codec_type": "audio"}], "format": {}}"#;
        let err = parse_probe_output(json.as_bytes()).unwrap_err();
        assert!(matches!(err, MediaError::InvalidVideo(_)));
    }

    #[test]
    fn test_into_processed_metadata() {
        let info = parse_probe_output(SAMPLE.as_bytes()).unwrap();
        let meta: ProcessedMetadata = info.into();
        assert_eq!(meta.size_bytes, 1_048_576);
        assert_eq!(meta.format.as_deref(), Some("mov"));
        assert_eq!(meta.codec.as_deref(), Some("h264"));
        assert!(meta.subtitle_cues.is_none());
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let err = probe_video("/nonexistent/video.mp4").await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
        let err = has_audio_stream("/nonexistent/video.mp4").await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}

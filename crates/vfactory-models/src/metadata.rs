//! Metadata describing a processed video.

use serde::{Deserialize, Serialize};

/// Information about the final output artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessedMetadata {
    /// Duration in seconds
    pub duration_secs: f64,
    /// File size in bytes
    pub size_bytes: u64,
    /// Container format (first name reported by ffprobe)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Bitrate in bits/second
    #[serde(default)]
    pub bitrate: u64,
    /// Width in pixels
    #[serde(default)]
    pub width: u32,
    /// Height in pixels
    #[serde(default)]
    pub height: u32,
    /// Frame rate (fps)
    #[serde(default)]
    pub fps: f64,
    /// Video codec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    /// Whether the output carries an audio track
    #[serde(default)]
    pub has_audio: bool,
    /// Number of subtitle cues rendered into the video
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_cues: Option<usize>,
}

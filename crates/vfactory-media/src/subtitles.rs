//! SRT subtitle parsing and formatting.

use std::path::Path;
use std::time::Duration;

use crate::error::{MediaError, MediaResult};

/// A single caption cue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleCue {
    /// 1-based sequence number
    pub index: usize,
    /// Start offset from the beginning of the media
    pub start: Duration,
    /// End offset from the beginning of the media
    pub end: Duration,
    /// Caption text (may span several lines)
    pub text: String,
}

/// Format an offset as an SRT timestamp (`HH:MM:SS,mmm`).
pub fn format_timestamp(offset: Duration) -> String {
    let total_ms = offset.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let seconds = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

fn parse_timestamp(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (hms, millis) = s.split_once([',', '.'])?;

    let mut parts = hms.split(':');
    let hours: u64 = parts.next()?.trim().parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
        return None;
    }

    // Tolerate 1-3 fractional digits ("5" means 500ms)
    if millis.is_empty() || millis.len() > 3 || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let millis: u64 = format!("{:0<3}", millis).parse().ok()?;

    let total = hours
        .checked_mul(3_600_000)?
        .checked_add(minutes * 60_000 + seconds * 1000 + millis)?;
    Some(Duration::from_millis(total))
}

/// Render cues as SRT text, renumbering them from 1.
///
/// Zero cues produce an empty string, which is itself a valid SRT document.
pub fn to_srt(cues: &[SubtitleCue]) -> String {
    let mut out = String::new();
    for (i, cue) in cues.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n",
            i + 1,
            format_timestamp(cue.start),
            format_timestamp(cue.end),
            cue.text.trim_end()
        ));
    }
    out
}

/// Parse SRT text into cues.
///
/// Accepts CRLF line endings, a leading BOM and missing sequence numbers.
/// Whitespace-only input yields zero cues; a block with an unreadable timing
/// line is an error.
pub fn parse_srt(input: &str) -> MediaResult<Vec<SubtitleCue>> {
    let normalized = input.trim_start_matches('\u{feff}').replace("\r\n", "\n");

    let mut cues = Vec::new();
    for block in normalized.split("\n\n") {
        let mut lines = block.lines().filter(|l| !l.trim().is_empty()).peekable();
        let Some(first) = lines.peek().copied() else {
            continue;
        };

        if !first.contains("-->") {
            if first.trim().parse::<usize>().is_err() {
                return Err(MediaError::InvalidSubtitles(format!(
                    "expected cue number, found {:?}",
                    first
                )));
            }
            lines.next();
        }

        let timing = lines.next().ok_or_else(|| {
            MediaError::InvalidSubtitles(format!("cue {} has no timing line", cues.len() + 1))
        })?;
        let (start, end) = timing
            .split_once("-->")
            .and_then(|(start, end)| {
                // Positioning hints may follow the end timestamp
                let end = end.split_whitespace().next()?;
                Some((parse_timestamp(start)?, parse_timestamp(end)?))
            })
            .ok_or_else(|| MediaError::InvalidSubtitles(format!("malformed timing line {:?}", timing)))?;

        if end < start {
            return Err(MediaError::InvalidSubtitles(format!(
                "cue ends before it starts: {:?}",
                timing
            )));
        }

        let text = lines.collect::<Vec<_>>().join("\n");
        cues.push(SubtitleCue {
            index: cues.len() + 1,
            start,
            end,
            text,
        });
    }

    Ok(cues)
}

/// Read and parse an SRT file.
pub async fn read_srt(path: impl AsRef<Path>) -> MediaResult<Vec<SubtitleCue>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    let bytes = tokio::fs::read(path).await?;
    parse_srt(&String::from_utf8_lossy(&bytes))
}

/// Write cues to an SRT file.
pub async fn write_srt(path: impl AsRef<Path>, cues: &[SubtitleCue]) -> MediaResult<()> {
    tokio::fs::write(path, to_srt(cues)).await?;
    Ok(())
}

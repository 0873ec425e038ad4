//! ffprobe media information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::trace;

use crate::error::MediaError;

/// What the pipeline needs to know about a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: Duration,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub has_audio: bool,
    pub size_bytes: u64,
}

impl MediaInfo {
    /// Length of one frame.
    pub fn frame_interval(&self) -> Duration {
        if self.fps > 0.0 {
            Duration::from_secs_f64(1.0 / self.fps)
        } else {
            Duration::ZERO
        }
    }

    /// Number of frames that cover the whole duration.
    pub fn frame_count(&self) -> u64 {
        (self.duration.as_secs_f64() * self.fps).ceil() as u64
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

/// Run ffprobe on `path`.
pub async fn probe(path: &Path) -> Result<MediaInfo, MediaError> {
    trace!("probe(path={}): invoking ffprobe", path.display());
    if !path.exists() {
        return Err(MediaError::ProbeFailed(format!("{} does not exist", path.display())));
    }
    which::which("ffprobe").map_err(|_| MediaError::ToolNotFound("ffprobe"))?;

    let output = Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;
    if !output.status.success() {
        return Err(MediaError::ProbeFailed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let mut info = parse_probe(&output.stdout, &path.display().to_string())?;
    if info.size_bytes == 0 {
        info.size_bytes = tokio::fs::metadata(path).await?.len();
    }
    Ok(info)
}

/// Interpret ffprobe's JSON. `name` is only used in error messages.
pub fn parse_probe(json: &[u8], name: &str) -> Result<MediaInfo, MediaError> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;
    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::NoVideoStream(name.to_string()))?;
    let has_audio = probe.streams.iter().any(|s| s.codec_type == "audio");

    let seconds = probe
        .format
        .duration
        .as_deref()
        .or(video.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);
    let fps = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(30.0);

    Ok(MediaInfo {
        duration: Duration::from_secs_f64(seconds),
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        fps,
        has_audio,
        size_bytes: probe.format.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0),
    })
}

/// Parse a frame rate such as `30/1`, `30000/1001` or `25`.
/// `0/0`, which ffprobe reports for unknown rates, yields `None`.
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    let rate = match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den <= 0.0 {
                return None;
            }
            num / den
        }
        None => s.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

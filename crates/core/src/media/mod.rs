//! Media probing, audio extraction and subtitle burn-in.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::composite::Compositor;
use crate::error::MediaError;

pub mod ffmpeg;
pub mod probe;

pub use ffmpeg::BurnStats;
pub use probe::{parse_frame_rate, MediaInfo};

/// Everything the burn step needs besides the frames themselves.
#[derive(Debug, Clone)]
pub struct BurnJob {
    pub source: PathBuf,
    pub output: PathBuf,
    pub info: MediaInfo,
    /// Directory for encoder diagnostics; the job namespace.
    pub log_dir: PathBuf,
}

/// The media operations a job performs.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Read duration, geometry, frame rate and audio presence.
    async fn probe(&self, path: &Path) -> Result<MediaInfo, MediaError>;

    /// Write the first audio stream of `source` to `dest` as mono 16 kHz WAV.
    async fn extract_audio(&self, source: &Path, dest: &Path, cancel: watch::Receiver<bool>) -> Result<(), MediaError>;

    /// Composite the overlays into every frame and encode the result with the
    /// source audio.
    async fn burn(
        &self,
        job: BurnJob,
        compositor: Arc<Compositor>,
        cancel: watch::Receiver<bool>,
    ) -> Result<BurnStats, MediaError>;
}

/// ffmpeg/ffprobe on `PATH`.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    audio_codec: String,
    command_timeout: Duration,
}

impl FfmpegBackend {
    /// Backend muxing audio with `audio_codec` (`aac` or `copy`).
    pub fn new(audio_codec: impl Into<String>) -> Self {
        Self {
            audio_codec: audio_codec.into(),
            command_timeout: Duration::from_secs(600),
        }
    }

    /// Limit for one-shot ffmpeg commands such as audio extraction.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new("aac")
    }
}

#[async_trait]
impl MediaBackend for FfmpegBackend {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, MediaError> {
        probe::probe(path).await
    }

    async fn extract_audio(&self, source: &Path, dest: &Path, cancel: watch::Receiver<bool>) -> Result<(), MediaError> {
        trace!("extract_audio(source={}, dest={})", source.display(), dest.display());
        let args = ffmpeg::extract_audio_args(source, dest);
        ffmpeg::run(&args, cancel, self.command_timeout).await
    }

    async fn burn(
        &self,
        job: BurnJob,
        compositor: Arc<Compositor>,
        cancel: watch::Receiver<bool>,
    ) -> Result<BurnStats, MediaError> {
        let audio_codec = self.audio_codec.clone();
        let span = tracing::Span::current();
        tokio::task::spawn_blocking(move || {
            span.in_scope(|| {
                ffmpeg::burn_blocking(
                    &job.source,
                    &job.output,
                    &job.info,
                    &compositor,
                    &audio_codec,
                    &job.log_dir,
                    &cancel,
                )
            })
        })
        .await
        .map_err(|e| MediaError::FfmpegFailed {
            message: format!("burn task failed: {e}"),
            exit_code: None,
        })?
    }
}

/// Fail unless ffmpeg and ffprobe are installed.
pub fn check_tools() -> Result<(), MediaError> {
    for tool in ["ffmpeg", "ffprobe"] {
        let path = which::which(tool).map_err(|_| MediaError::ToolNotFound(tool))?;
        debug!("found {} at {}", tool, path.display());
    }
    Ok(())
}

/// The encoded output must last as long as the source, give or take one frame.
pub fn verify_duration(source: &MediaInfo, output: &MediaInfo) -> Result<(), MediaError> {
    let expected = source.duration.as_secs_f64();
    let actual = output.duration.as_secs_f64();
    let tolerance = source.frame_interval().as_secs_f64();
    if (expected - actual).abs() <= tolerance + 1e-6 {
        Ok(())
    } else {
        Err(MediaError::DurationMismatch { expected, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(secs: f64, fps: f64) -> MediaInfo {
        MediaInfo {
            duration: Duration::from_secs_f64(secs),
            width: 640,
            height: 360,
            fps,
            has_audio: true,
            size_bytes: 0,
        }
    }

    #[test]
    fn duration_within_one_frame_passes() {
        let source = info(10.0, 25.0);
        assert!(verify_duration(&source, &info(10.04, 25.0)).is_ok());
        assert!(verify_duration(&source, &info(9.97, 25.0)).is_ok());
    }

    #[test]
    fn duration_off_by_more_than_a_frame_fails() {
        let source = info(10.0, 25.0);
        let err = verify_duration(&source, &info(9.5, 25.0)).unwrap_err();
        assert!(matches!(err, MediaError::DurationMismatch { .. }));
    }
}

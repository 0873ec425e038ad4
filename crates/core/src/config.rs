//! Pipeline configuration.
//!
//! Defaults match the behaviour of the hosted bot; every value can be
//! overridden through `SUBBURN_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::render::{Alignment, PlateSize, PlateStyle, RenderStyle};
use crate::retry::RetryPolicy;

/// Timing parameters for the overlay scheduler.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Signed offset added to every segment start, in milliseconds.
    pub offset_ms: i64,
    /// Shortest time an overlay stays on screen.
    pub min_display: Duration,
    /// Gap between the subtitle canvas and the bottom of the frame.
    pub bottom_margin: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            offset_ms: 1800,
            min_display: Duration::from_millis(50),
            bottom_margin: 30,
        }
    }
}

/// Full configuration for a [`crate::pipeline::SubtitlePipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of jobs running at the same time.
    pub max_concurrent_jobs: usize,
    /// Root under which each job gets its own namespace.
    pub work_dir: PathBuf,
    /// Largest accepted source file.
    pub max_input_bytes: u64,
    /// Longest accepted source video.
    pub max_duration: Duration,
    /// Language spoken in the source video.
    pub source_language: String,
    /// Default subtitle language.
    pub target_language: String,
    /// How many segments are translated in parallel within a job.
    pub translate_concurrency: usize,
    pub transcription_retry: RetryPolicy,
    pub translation_retry: RetryPolicy,
    pub timing: TimingConfig,
    pub style: RenderStyle,
    /// Font files tried before the system font list.
    pub font_paths: Vec<PathBuf>,
    /// Audio codec for the output container (`aac` or `copy`).
    pub audio_codec: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            work_dir: std::env::temp_dir().join("subburn"),
            max_input_bytes: 50 * 1024 * 1024,
            max_duration: Duration::from_secs(600),
            source_language: "en".to_string(),
            target_language: "he".to_string(),
            translate_concurrency: 4,
            transcription_retry: RetryPolicy::transcription(),
            translation_retry: RetryPolicy::translation(),
            timing: TimingConfig::default(),
            style: RenderStyle::default(),
            font_paths: Vec::new(),
            audio_codec: "aac".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut timing = defaults.timing.clone();
        timing.offset_ms = env_or("SUBBURN_OFFSET_MS", timing.offset_ms);
        timing.min_display = min_display(env_or("SUBBURN_MIN_DISPLAY_MS", timing.min_display.as_millis() as u64));
        timing.bottom_margin = env_or("SUBBURN_BOTTOM_MARGIN", timing.bottom_margin);

        let mut style = defaults.style.clone();
        style.font_size = env_or("SUBBURN_FONT_SIZE", style.font_size);
        if let Ok(plate) = std::env::var("SUBBURN_PLATE") {
            style.plate = match plate.as_str() {
                "none" => PlateStyle::None,
                "solid" => PlateStyle::Solid(PlateSize::TextBounds),
                "full" => PlateStyle::Translucent {
                    alpha: 160,
                    size: PlateSize::FullWidth,
                },
                _ => style.plate,
            };
        }
        if let Ok(align) = std::env::var("SUBBURN_LTR_ALIGN") {
            if align == "left" {
                style.ltr_alignment = Alignment::Leading;
            }
        }

        let font_paths = std::env::var("SUBBURN_FONT_PATHS")
            .map(|v| {
                v.split(':')
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            max_concurrent_jobs: env_or("SUBBURN_MAX_JOBS", defaults.max_concurrent_jobs).max(1),
            work_dir: std::env::var("SUBBURN_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            max_input_bytes: env_or("SUBBURN_MAX_INPUT_MB", 50u64) * 1024 * 1024,
            max_duration: Duration::from_secs(env_or(
                "SUBBURN_MAX_DURATION_SECS",
                defaults.max_duration.as_secs(),
            )),
            source_language: std::env::var("SUBBURN_SOURCE_LANG").unwrap_or(defaults.source_language),
            target_language: std::env::var("SUBBURN_TARGET_LANG").unwrap_or(defaults.target_language),
            translate_concurrency: env_or("SUBBURN_TRANSLATE_CONCURRENCY", defaults.translate_concurrency)
                .max(1),
            transcription_retry: defaults.transcription_retry,
            translation_retry: defaults.translation_retry,
            timing,
            style,
            font_paths,
            audio_codec: std::env::var("SUBBURN_AUDIO_CODEC").unwrap_or(defaults.audio_codec),
        }
    }
}

/// Display floor in milliseconds, never zero.
fn min_display(ms: u64) -> Duration {
    Duration::from_millis(ms.max(MIN_DISPLAY_FLOOR_MS))
}

const MIN_DISPLAY_FLOOR_MS: u64 = 1;

/// Parse `key` from the environment, or fall back to `default`.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_hosted_bot() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.timing.offset_ms, 1800);
        assert_eq!(config.timing.min_display, Duration::from_millis(50));
        assert_eq!(config.max_input_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn zero_display_floor_is_raised() {
        assert_eq!(min_display(0), Duration::from_millis(1));
        assert_eq!(min_display(80), Duration::from_millis(80));

        std::env::set_var("SUBBURN_MIN_DISPLAY_MS", "0");
        let config = PipelineConfig::from_env();
        std::env::remove_var("SUBBURN_MIN_DISPLAY_MS");
        assert!(config.timing.min_display > Duration::ZERO);
    }

    #[test]
    fn env_or_ignores_garbage() {
        assert_eq!(env_or("SUBBURN_TEST_UNSET_KEY", 7u32), 7);
    }
}

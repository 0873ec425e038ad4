//! Binary entry point: burn translated subtitles into one video.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use subburn_core::job::{JobProgress, ProgressFn};
use subburn_core::media::{self, FfmpegBackend};
use subburn_core::openai::OpenAiEndpoint;
use subburn_core::transcribe::openai::WhisperApiTranscriber;
use subburn_core::translate::openai::OpenAiTranslator;
use subburn_core::{srt, JobRequest, MediaSource, PipelineConfig, SubtitlePipeline};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command line options for the binary.
#[derive(Parser)]
struct Cli {
    /// Subtitle language, e.g. `he` or `ar`.
    #[arg(long)]
    target: Option<String>,

    /// Language spoken in the video.
    #[arg(long)]
    source: Option<String>,

    /// Shift every subtitle by this many milliseconds (may be negative).
    #[arg(long, allow_hyphen_values = true)]
    offset_ms: Option<i64>,

    /// Use this SRT file instead of transcribing the audio.
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Directory that receives the subtitled video and its .srt file.
    #[arg(long, default_value = ".")]
    out: PathBuf,

    /// Font file to try before the system fonts. Repeatable.
    #[arg(long = "font")]
    fonts: Vec<PathBuf>,

    /// Subtitle font size in pixels.
    #[arg(long)]
    font_size: Option<f32>,

    /// Audio codec for the output (`aac` or `copy`).
    #[arg(long)]
    audio_codec: Option<String>,

    /// Enable verbose debug and trace logs.
    #[arg(long)]
    debug: bool,

    /// Path to the video we want to subtitle.
    input: PathBuf,
}

impl Cli {
    /// Environment config with the flags laid on top.
    fn config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::from_env();
        if let Some(source) = &self.source {
            config.source_language = source.clone();
        }
        if let Some(offset) = self.offset_ms {
            config.timing.offset_ms = offset;
        }
        if let Some(size) = self.font_size {
            config.style.font_size = size;
        }
        if let Some(codec) = &self.audio_codec {
            config.audio_codec = codec.clone();
        }
        let mut fonts = self.fonts.clone();
        fonts.append(&mut config.font_paths);
        config.font_paths = fonts;
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = if cli.debug {
        EnvFilter::default()
            .add_directive("subburn=trace".parse()?)
            .add_directive("subburn_core=trace".parse()?)
            .add_directive("info".parse()?)
    } else {
        EnvFilter::default()
            .add_directive("subburn=info".parse()?)
            .add_directive("subburn_core=info".parse()?)
            .add_directive("warn".parse()?)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    media::check_tools()?;
    if !cli.input.is_file() {
        bail!("{} is not a file", cli.input.display());
    }

    let config = cli.config();
    let mut request = JobRequest::new(MediaSource::Path(cli.input.clone()), &cli.out);
    if let Some(target) = &cli.target {
        request = request.with_target_language(target.clone());
    }
    if let Some(path) = &cli.transcript {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        request = request.with_transcript(srt::parse(&text)?);
    }

    let transcriber = WhisperApiTranscriber::new(OpenAiEndpoint::from_env(Duration::from_secs(300))?)?;
    let translator = OpenAiTranslator::new(OpenAiEndpoint::from_env(Duration::from_secs(60))?)?;
    let backend = FfmpegBackend::new(config.audio_codec.clone());
    let pipeline = SubtitlePipeline::new(config, Arc::new(transcriber), Arc::new(translator), Arc::new(backend));

    let progress: ProgressFn = Arc::new(|p: &JobProgress| match &p.detail {
        Some(detail) => eprintln!("{}: {} ({})", p.job_id, p.state, detail),
        None => eprintln!("{}: {}", p.job_id, p.state),
    });
    info!("processing {}", cli.input.display());
    let report = pipeline.process(request, Some(progress)).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(failure) = report.error {
        bail!("{}: {}", failure.kind, failure.message);
    }
    Ok(())
}

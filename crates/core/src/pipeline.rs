//! Job orchestration.
//!
//! [`SubtitlePipeline::submit`] claims a pool slot or fails at once, then runs
//! the job's stages one after another on a tokio task:
//! download, audio extraction, transcription, translation, rendering,
//! encoding and delivery. Whatever happens, the job's workspace is removed
//! and its slot released before the final report is produced.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use crate::composite::{Compositor, OverlayIndex};
use crate::config::PipelineConfig;
use crate::error::{ErrorKind, JobError, JobFailure, MediaError, SubmitError};
use crate::job::{
    Job, JobId, JobProgress, JobReport, JobRequest, JobState, JobStatus, MediaSource, Outcome, ProgressFn,
};
use crate::media::{self, BurnJob, MediaBackend, MediaInfo};
use crate::render::{FontChain, Rasterizer, RenderStyle, SubtitleBlock};
use crate::schedule::{schedule, OverlayInstruction};
use crate::session::{move_file, JobPool, PoolSlot, Workspace};
use crate::shape::{BidiShaper, Shaper};
use crate::srt::{self, SrtCue};
use crate::transcribe::{transcribe_with_retry, TranscriptionService};
use crate::transcript;
use crate::translate::{translate_segments, LanguagePair, TranslatedSegment, Translator};

/// Entry point: owns the job pool and the shared services.
pub struct SubtitlePipeline {
    runner: JobRunner,
    pool: JobPool,
}

/// A running job.
pub struct JobHandle {
    id: JobId,
    cancel: watch::Sender<bool>,
    task: JoinHandle<JobReport>,
}

impl JobHandle {
    /// The job's id, also its workspace and output name.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Ask the job to stop. It still cleans up and reports `Cancelled`.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Wait for the final report.
    pub async fn join(self) -> JobReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                error!(job_id = %self.id, "job task aborted: {}", e);
                JobReport {
                    id: self.id,
                    status: JobStatus::Failed,
                    output: None,
                    subtitles: None,
                    error: Some(JobFailure {
                        kind: ErrorKind::ResourceError,
                        message: format!("job task aborted: {e}"),
                    }),
                    warnings: 0,
                    segments: 0,
                }
            }
        }
    }
}

/// Shared state handed to each job task.
#[derive(Clone)]
struct JobRunner {
    config: Arc<PipelineConfig>,
    transcriber: Arc<dyn TranscriptionService>,
    translator: Arc<dyn Translator>,
    media: Arc<dyn MediaBackend>,
    shaper: Arc<dyn Shaper>,
    rasterizer: Rasterizer,
}

/// Artifacts in the caller's delivery directory.
struct Delivered {
    output: PathBuf,
    subtitles: PathBuf,
}

impl SubtitlePipeline {
    /// Build a pipeline with the default shaper and the font chain resolved
    /// from the configured and system fonts.
    pub fn new(
        config: PipelineConfig,
        transcriber: Arc<dyn TranscriptionService>,
        translator: Arc<dyn Translator>,
        media: Arc<dyn MediaBackend>,
    ) -> Self {
        let fonts = FontChain::resolve(&config.font_paths);
        let pool = JobPool::new(config.max_concurrent_jobs);
        Self {
            runner: JobRunner {
                config: Arc::new(config),
                transcriber,
                translator,
                media,
                shaper: Arc::new(BidiShaper),
                rasterizer: Rasterizer::new(Arc::new(fonts)),
            },
            pool,
        }
    }

    /// Replace the shaper.
    pub fn with_shaper(mut self, shaper: Arc<dyn Shaper>) -> Self {
        self.runner.shaper = shaper;
        self
    }

    /// Render with `fonts` instead of the resolved chain.
    pub fn with_fonts(mut self, fonts: FontChain) -> Self {
        self.runner.rasterizer = Rasterizer::new(Arc::new(fonts));
        self
    }

    /// Configuration every job runs with.
    pub fn config(&self) -> &PipelineConfig {
        &self.runner.config
    }

    /// The job slots.
    pub fn pool(&self) -> &JobPool {
        &self.pool
    }

    /// Start a job, or reject it if every slot is busy.
    pub fn submit(&self, request: JobRequest, progress: Option<ProgressFn>) -> Result<JobHandle, SubmitError> {
        let slot = self.pool.try_admit()?;
        let id = JobId::new();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let runner = self.runner.clone();
        info!(job_id = %id, "job admitted, {} slot(s) left", self.pool.available());
        let task = tokio::spawn(
            runner
                .run(id, slot, request, progress, cancel_rx)
                .instrument(info_span!("job", job_id = %id)),
        );
        Ok(JobHandle {
            id,
            cancel: cancel_tx,
            task,
        })
    }

    /// Submit and wait.
    pub async fn process(&self, request: JobRequest, progress: Option<ProgressFn>) -> Result<JobReport, SubmitError> {
        Ok(self.submit(request, progress)?.join().await)
    }
}

impl JobRunner {
    /// Run one job to its terminal state. Always returns a report.
    async fn run(
        self,
        id: JobId,
        _slot: PoolSlot,
        request: JobRequest,
        progress: Option<ProgressFn>,
        cancel: watch::Receiver<bool>,
    ) -> JobReport {
        let mut job = Job::new(id, self.config.work_dir.join(id.to_string()));
        let result = match Workspace::create(&self.config.work_dir, &id).await {
            Ok(workspace) => {
                let result = self.execute(&mut job, &request, &workspace, &progress, &cancel).await;
                let outcome = if result.is_ok() { Outcome::Success } else { Outcome::Failed };
                self.enter(&mut job, JobState::Cleanup(outcome), None, &progress);
                if let Err(e) = workspace.close().await {
                    warn!("workspace cleanup failed: {}", e);
                }
                result
            }
            Err(e) => {
                let err = JobError::Resource(e);
                self.enter(&mut job, JobState::Cleanup(Outcome::Failed), None, &progress);
                Err(err)
            }
        };

        match result {
            Ok(delivered) => {
                self.enter(&mut job, JobState::Terminal(Outcome::Success), None, &progress);
                info!(
                    "job succeeded: {} segment(s), {} warning(s)",
                    job.segments.len(),
                    job.warnings
                );
                JobReport {
                    id,
                    status: JobStatus::Succeeded,
                    output: Some(delivered.output),
                    subtitles: Some(delivered.subtitles),
                    error: None,
                    warnings: job.warnings,
                    segments: job.segments.len(),
                }
            }
            Err(err) => {
                let failure = err.to_failure();
                self.enter(
                    &mut job,
                    JobState::Terminal(Outcome::Failed),
                    Some(failure.message.clone()),
                    &progress,
                );
                warn!("job failed ({}): {}", failure.kind, failure.message);
                JobReport {
                    id,
                    status: JobStatus::Failed,
                    output: None,
                    subtitles: None,
                    error: Some(failure),
                    warnings: job.warnings,
                    segments: job.segments.len(),
                }
            }
        }
    }

    /// The stages from download to delivery.
    async fn execute(
        &self,
        job: &mut Job,
        request: &JobRequest,
        workspace: &Workspace,
        progress: &Option<ProgressFn>,
        cancel: &watch::Receiver<bool>,
    ) -> Result<Delivered, JobError> {
        let config = &self.config;

        self.step(job, JobState::Downloading, None, progress, cancel)?;
        job.source_video_path = self.fetch_source(&request.source, workspace).await?;
        let info = self.admit_media(&job.source_video_path).await?;

        let audio = workspace.file("audio.wav");
        let detail = if request.transcript.is_some() {
            Some("transcript supplied, audio not needed".to_string())
        } else {
            self.media
                .extract_audio(&job.source_video_path, &audio, cancel.clone())
                .await?;
            None
        };
        self.step(job, JobState::AudioExtracted, detail, progress, cancel)?;

        self.step(job, JobState::Transcribing, None, progress, cancel)?;
        let raw = match &request.transcript {
            Some(cues) => transcript::from_srt(cues),
            None => {
                until_cancelled(
                    cancel,
                    transcribe_with_retry(
                        self.transcriber.as_ref(),
                        &audio,
                        &config.source_language,
                        &config.transcription_retry,
                    ),
                )
                .await?
            }
        };
        let segments = transcript::normalize(raw, config.timing.min_display);

        let target = request
            .target_language
            .clone()
            .unwrap_or_else(|| config.target_language.clone());
        self.step(
            job,
            JobState::Translating,
            Some(format!("{} segment(s)", segments.len())),
            progress,
            cancel,
        )?;
        let languages = LanguagePair::new(config.source_language.clone(), target);
        let translation = until_cancelled(cancel, async {
            Ok(translate_segments(
                self.translator.as_ref(),
                segments,
                &languages,
                &config.translation_retry,
                config.translate_concurrency,
            )
            .await)
        })
        .await?;
        job.warnings = translation.warnings;
        job.segments = translation.segments;

        self.step(job, JobState::Rendering, None, progress, cancel)?;
        let blocks = self.render(job.segments.clone(), info.width).await?;
        job.overlays = schedule(&blocks, (info.width, info.height), &config.timing);

        self.step(job, JobState::Encoding, None, progress, cancel)?;
        let output = workspace.file("output.mp4");
        let compositor = Arc::new(Compositor::new(OverlayIndex::build(job.overlays.clone())));
        let burn = BurnJob {
            source: job.source_video_path.clone(),
            output: output.clone(),
            info: info.clone(),
            log_dir: workspace.path().to_path_buf(),
        };
        self.media.burn(burn, compositor, cancel.clone()).await?;
        let encoded = self.media.probe(&output).await?;
        media::verify_duration(&info, &encoded)?;
        job.output_path = Some(output.clone());

        let sidecar = workspace.file("subtitles.srt");
        tokio::fs::write(&sidecar, srt::format(&sidecar_cues(&job.segments, &job.overlays))).await?;

        self.step(job, JobState::Delivering, None, progress, cancel)?;
        self.deliver(job.id, &output, &sidecar, &request.deliver_dir).await
    }

    /// Copy or write the source into the workspace, enforcing the size limit.
    async fn fetch_source(&self, source: &MediaSource, workspace: &Workspace) -> Result<PathBuf, JobError> {
        let limit = self.config.max_input_bytes;
        match source {
            MediaSource::Path(path) => {
                let meta = tokio::fs::metadata(path)
                    .await
                    .map_err(|_| JobError::Input(format!("source video {} not found", path.display())))?;
                if !meta.is_file() {
                    return Err(JobError::Input(format!("{} is not a file", path.display())));
                }
                check_size(meta.len(), limit)?;
                let dest = workspace.file(&source_name(path));
                tokio::fs::copy(path, &dest).await?;
                Ok(dest)
            }
            MediaSource::Bytes { file_name, data } => {
                if data.is_empty() {
                    return Err(JobError::Input("source video is empty".to_string()));
                }
                check_size(data.len() as u64, limit)?;
                let dest = workspace.file(&source_name(Path::new(file_name)));
                tokio::fs::write(&dest, data.as_slice()).await?;
                Ok(dest)
            }
        }
    }

    /// Probe the source and reject what cannot be processed.
    async fn admit_media(&self, source: &Path) -> Result<MediaInfo, JobError> {
        let info = self.media.probe(source).await.map_err(|e| match e {
            MediaError::Io(io) => JobError::Resource(io),
            MediaError::Cancelled => JobError::Cancelled,
            MediaError::ToolNotFound(_) => JobError::Encode(e.to_string()),
            other => JobError::Input(format!("unreadable video: {other}")),
        })?;
        if !info.has_audio {
            return Err(JobError::Input("video has no audio track to transcribe".to_string()));
        }
        if info.duration > self.config.max_duration {
            return Err(JobError::Input(format!(
                "video is {}s long, the limit is {}s",
                info.duration.as_secs(),
                self.config.max_duration.as_secs()
            )));
        }
        if info.width == 0 || info.height == 0 {
            return Err(JobError::Input("video has no usable frame size".to_string()));
        }
        info!(
            "source {}x{} @ {:.2}fps, {:.1}s",
            info.width,
            info.height,
            info.fps,
            info.duration.as_secs_f64()
        );
        Ok(info)
    }

    /// Shape each subtitle once, wrap it, and rasterize all blocks on a
    /// shared canvas height.
    async fn render(
        &self,
        segments: Vec<TranslatedSegment>,
        frame_width: u32,
    ) -> Result<Vec<(TranslatedSegment, Arc<SubtitleBlock>)>, JobError> {
        let shaper = Arc::clone(&self.shaper);
        let rasterizer = self.rasterizer.clone();
        let style: RenderStyle = self.config.style.clone();
        let span = tracing::Span::current();
        tokio::task::spawn_blocking(move || {
            span.in_scope(|| render_blocking(shaper.as_ref(), &rasterizer, &style, segments, frame_width))
        })
        .await
        .map_err(|e| JobError::Encode(format!("render task failed: {e}")))
    }

    /// Move the video and sidecar into `dir`, named after the job.
    async fn deliver(&self, id: JobId, output: &Path, sidecar: &Path, dir: &Path) -> Result<Delivered, JobError> {
        tokio::fs::create_dir_all(dir).await?;
        let video = dir.join(format!("{id}.mp4"));
        let subtitles = dir.join(format!("{id}.srt"));
        move_file(output, &video).await?;
        if let Err(e) = move_file(sidecar, &subtitles).await {
            // never leave half a delivery behind
            let _ = tokio::fs::remove_file(&video).await;
            return Err(e.into());
        }
        info!("delivered {}", video.display());
        Ok(Delivered {
            output: video,
            subtitles,
        })
    }

    /// Advance to a working stage, unless the job was cancelled.
    fn step(
        &self,
        job: &mut Job,
        state: JobState,
        detail: Option<String>,
        progress: &Option<ProgressFn>,
        cancel: &watch::Receiver<bool>,
    ) -> Result<(), JobError> {
        if *cancel.borrow() {
            return Err(JobError::Cancelled);
        }
        self.enter(job, state, detail, progress);
        Ok(())
    }

    /// Record a transition, log it and notify the observer.
    fn enter(&self, job: &mut Job, state: JobState, detail: Option<String>, progress: &Option<ProgressFn>) {
        if let Err(e) = job.state.advance(state) {
            warn!("{}", e);
            return;
        }
        match &detail {
            Some(d) => info!("{} ({})", state, d),
            None => info!("{}", state),
        }
        if let Some(callback) = progress {
            callback(&JobProgress {
                job_id: job.id,
                state,
                detail,
            });
        }
    }
}

/// Blocking half of [`JobRunner::render`].
fn render_blocking(
    shaper: &dyn Shaper,
    rasterizer: &Rasterizer,
    style: &RenderStyle,
    segments: Vec<TranslatedSegment>,
    frame_width: u32,
) -> Vec<(TranslatedSegment, Arc<SubtitleBlock>)> {
    let wrapped: Vec<_> = segments
        .iter()
        .map(|segment| {
            let shaped = shaper.shape(&segment.target_text);
            let lines = rasterizer.wrap(&shaped, frame_width, style);
            (shaped.direction(), lines)
        })
        .collect();
    let max_lines = wrapped.iter().map(|(_, lines)| lines.len()).max().unwrap_or(1);
    let height = Rasterizer::canvas_height(max_lines, style);
    info!(
        "rendering {} subtitle(s) on {}x{} canvases with font {}",
        segments.len(),
        frame_width,
        height,
        rasterizer.fonts().primary_name()
    );
    segments
        .into_iter()
        .zip(wrapped)
        .map(|(segment, (direction, lines))| {
            let block = rasterizer.rasterize(&lines, frame_width, height, style, direction);
            (segment, Arc::new(block))
        })
        .collect()
}

/// Await `fut` unless the job is cancelled first.
async fn until_cancelled<T>(
    cancel: &watch::Receiver<bool>,
    fut: impl Future<Output = Result<T, JobError>>,
) -> Result<T, JobError> {
    let mut rx = cancel.clone();
    tokio::select! {
        result = fut => result,
        _ = media::ffmpeg::cancelled(&mut rx) => Err(JobError::Cancelled),
    }
}

/// Reject sources above the configured size limit.
fn check_size(size: u64, limit: u64) -> Result<(), JobError> {
    if size > limit {
        return Err(JobError::Input(format!(
            "video is {:.1} MB, the limit is {:.1} MB",
            size as f64 / 1_048_576.0,
            limit as f64 / 1_048_576.0
        )));
    }
    Ok(())
}

/// Workspace name for the source; only the extension is kept from the caller.
fn source_name(original: &Path) -> String {
    match original.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.chars().all(|c| c.is_ascii_alphanumeric()) => format!("source.{ext}"),
        _ => "source.mp4".to_string(),
    }
}

/// SRT cues matching what is burned in: displayed times and target text.
fn sidecar_cues(segments: &[TranslatedSegment], overlays: &[OverlayInstruction]) -> Vec<SrtCue> {
    segments
        .iter()
        .zip(overlays)
        .enumerate()
        .map(|(i, (segment, overlay))| SrtCue {
            index: i as u32 + 1,
            start: overlay.display_start,
            end: overlay.display_end(),
            lines: segment.target_text.lines().map(str::to_string).collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExternalError;
    use crate::media::BurnStats;
    use crate::retry::RetryPolicy;
    use crate::shape::ShapedText;
    use crate::transcript::RawSegment;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Fixed transcript, optionally held until a gate opens.
    struct FakeAsr {
        segments: Vec<RawSegment>,
        calls: AtomicU32,
        gate: Option<watch::Receiver<bool>>,
    }

    impl FakeAsr {
        fn new(segments: Vec<RawSegment>) -> Self {
            Self {
                segments,
                calls: AtomicU32::new(0),
                gate: None,
            }
        }
    }

    #[async_trait]
    impl TranscriptionService for FakeAsr {
        async fn transcribe(&self, _audio: &Path, _language: &str) -> Result<Vec<RawSegment>, ExternalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let mut gate = gate.clone();
                loop {
                    let open = *gate.borrow();
                    if open || gate.changed().await.is_err() {
                        break;
                    }
                }
            }
            Ok(self.segments.clone())
        }
    }

    /// Times out every call.
    struct DeadAsr {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TranscriptionService for DeadAsr {
        async fn transcribe(&self, _audio: &Path, _language: &str) -> Result<Vec<RawSegment>, ExternalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ExternalError::Timeout(Duration::from_secs(60)))
        }
    }

    /// Prefixes the target language; fails for one input.
    struct MockTr {
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl Translator for MockTr {
        async fn translate(&self, text: &str, _source: &str, target: &str) -> Result<String, ExternalError> {
            if Some(text) == self.fail_on {
                return Err(ExternalError::Server {
                    status: 503,
                    message: "unavailable".into(),
                });
            }
            Ok(format!("{target}:{text}"))
        }
    }

    /// Stands in for ffmpeg: writes placeholder files and records overlays.
    struct FakeMedia {
        source: MediaInfo,
        output_duration: Duration,
        burned: Mutex<Vec<Vec<(Duration, Duration, String)>>>,
    }

    impl FakeMedia {
        fn new(duration: Duration, has_audio: bool) -> Self {
            Self {
                source: MediaInfo {
                    duration,
                    width: 640,
                    height: 360,
                    fps: 25.0,
                    has_audio,
                    size_bytes: 4,
                },
                output_duration: duration,
                burned: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MediaBackend for FakeMedia {
        async fn probe(&self, path: &Path) -> Result<MediaInfo, MediaError> {
            let mut info = self.source.clone();
            if path.file_name().is_some_and(|n| n == "output.mp4") {
                info.duration = self.output_duration;
            }
            Ok(info)
        }

        async fn extract_audio(&self, _source: &Path, dest: &Path, _cancel: watch::Receiver<bool>) -> Result<(), MediaError> {
            tokio::fs::write(dest, b"RIFF").await?;
            Ok(())
        }

        async fn burn(
            &self,
            job: BurnJob,
            compositor: Arc<Compositor>,
            _cancel: watch::Receiver<bool>,
        ) -> Result<BurnStats, MediaError> {
            let overlays = compositor
                .index()
                .instructions()
                .iter()
                .map(|o| {
                    let text = o.block.lines.iter().map(|l| l.visual_text.clone()).collect::<Vec<_>>().join(" ");
                    (o.display_start, o.display_end(), text)
                })
                .collect();
            self.burned.lock().unwrap().push(overlays);
            tokio::fs::write(&job.output, b"mp4").await?;
            Ok(BurnStats {
                frames: job.info.frame_count(),
                frames_with_overlay: 0,
            })
        }
    }

    /// Counts calls, delegating to the real shaper.
    #[derive(Default)]
    struct CountingShaper {
        calls: AtomicUsize,
    }

    impl Shaper for CountingShaper {
        fn shape(&self, logical: &str) -> ShapedText {
            self.calls.fetch_add(1, Ordering::SeqCst);
            BidiShaper.shape(logical)
        }
    }

    struct Fixture {
        work: TempDir,
        out: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                work: tempfile::tempdir().unwrap(),
                out: tempfile::tempdir().unwrap(),
            }
        }

        fn config(&self) -> PipelineConfig {
            PipelineConfig {
                work_dir: self.work.path().to_path_buf(),
                transcription_retry: RetryPolicy::immediate(3, Duration::from_millis(1)),
                translation_retry: RetryPolicy::immediate(3, Duration::from_millis(1)),
                ..Default::default()
            }
        }

        fn request(&self) -> JobRequest {
            JobRequest::new(
                MediaSource::Bytes {
                    file_name: "clip.mp4".into(),
                    data: Arc::new(b"fake".to_vec()),
                },
                self.out.path(),
            )
        }

        fn pipeline(
            &self,
            config: PipelineConfig,
            asr: Arc<dyn TranscriptionService>,
            tr: Arc<dyn Translator>,
            media: Arc<dyn MediaBackend>,
        ) -> SubtitlePipeline {
            SubtitlePipeline::new(config, asr, tr, media).with_fonts(FontChain::builtin())
        }

        fn workspaces_left(&self) -> usize {
            std::fs::read_dir(self.work.path()).unwrap().count()
        }
    }

    fn three_segments() -> Vec<RawSegment> {
        vec![
            RawSegment::new(0.0, 1.0, "one"),
            RawSegment::new(2.0, 3.0, "two"),
            RawSegment::new(4.0, 5.0, "three"),
        ]
    }

    /// Log output shared with the test.
    struct LogSink(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn render_logs_carry_the_job_id() {
        let logs: Arc<Mutex<Vec<u8>>> = Arc::default();
        let sink = Arc::clone(&logs);
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || LogSink(Arc::clone(&sink)))
            .finish();
        // render runs on a blocking-pool thread, so a thread-local default would miss it
        tracing::subscriber::set_global_default(subscriber).unwrap();

        let fx = Fixture::new();
        let pipeline = fx.pipeline(
            fx.config(),
            Arc::new(FakeAsr::new(three_segments())),
            Arc::new(MockTr { fail_on: None }),
            Arc::new(FakeMedia::new(Duration::from_secs(10), true)),
        );
        let report = pipeline.process(fx.request(), None).await.unwrap();
        assert!(report.is_success());

        let text = String::from_utf8(logs.lock().unwrap().clone()).unwrap();
        let job_id = format!("job_id={}", report.id);
        let line = text
            .lines()
            .find(|l| l.contains("rendering 3 subtitle(s)") && l.contains(&job_id))
            .unwrap_or_else(|| panic!("no render line for {job_id} in:\n{text}"));
        assert!(line.contains("builtin"));
    }

    #[tokio::test]
    async fn overlay_is_offset_and_output_matches_source() {
        let fx = Fixture::new();
        let media = Arc::new(FakeMedia::new(Duration::from_secs(4), true));
        let pipeline = fx.pipeline(
            fx.config(),
            Arc::new(FakeAsr::new(vec![RawSegment::new(0.0, 2.0, "Hello")])),
            Arc::new(MockTr { fail_on: None }),
            media.clone(),
        );
        let report = pipeline.process(fx.request(), None).await.unwrap();
        assert!(report.is_success(), "{:?}", report.error);

        let burned = media.burned.lock().unwrap();
        assert_eq!(burned[0].len(), 1);
        assert_eq!(burned[0][0].0, Duration::from_millis(1800));
        assert_eq!(burned[0][0].1, Duration::from_millis(3800));

        let output = report.output.unwrap();
        assert_eq!(output, fx.out.path().join(format!("{}.mp4", report.id)));
        assert!(output.exists());
        let srt = std::fs::read_to_string(report.subtitles.unwrap()).unwrap();
        assert!(srt.contains("00:00:01,800 --> 00:00:03,800"));
        assert!(srt.contains("he:Hello"));
        assert_eq!(fx.workspaces_left(), 0);
    }

    #[tokio::test]
    async fn failed_translation_falls_back_and_job_succeeds() {
        let fx = Fixture::new();
        let media = Arc::new(FakeMedia::new(Duration::from_secs(10), true));
        let pipeline = fx.pipeline(
            fx.config(),
            Arc::new(FakeAsr::new(three_segments())),
            Arc::new(MockTr { fail_on: Some("two") }),
            media.clone(),
        );
        let report = pipeline.process(fx.request(), None).await.unwrap();
        assert_eq!(report.status, JobStatus::Succeeded);
        assert_eq!(report.warnings, 1);
        assert_eq!(report.segments, 3);

        let burned = media.burned.lock().unwrap();
        let texts: Vec<&str> = burned[0].iter().map(|(_, _, t)| t.as_str()).collect();
        assert_eq!(texts, vec!["he:one", "two", "he:three"]);
    }

    #[tokio::test]
    async fn exhausted_transcription_fails_and_cleans_up() {
        let fx = Fixture::new();
        let asr = Arc::new(DeadAsr {
            calls: AtomicU32::new(0),
        });
        let pipeline = fx.pipeline(
            fx.config(),
            asr.clone(),
            Arc::new(MockTr { fail_on: None }),
            Arc::new(FakeMedia::new(Duration::from_secs(10), true)),
        );
        let report = pipeline.process(fx.request(), None).await.unwrap();
        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.error.unwrap().kind, ErrorKind::FatalExternalError);
        assert_eq!(asr.calls.load(Ordering::SeqCst), 3);
        assert_eq!(fx.workspaces_left(), 0);
        assert_eq!(std::fs::read_dir(fx.out.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_audio_is_rejected_before_transcription() {
        let fx = Fixture::new();
        let asr = Arc::new(FakeAsr::new(three_segments()));
        let pipeline = fx.pipeline(
            fx.config(),
            asr.clone(),
            Arc::new(MockTr { fail_on: None }),
            Arc::new(FakeMedia::new(Duration::from_secs(10), false)),
        );
        let report = pipeline.process(fx.request(), None).await.unwrap();
        assert_eq!(report.error.unwrap().kind, ErrorKind::InputError);
        assert_eq!(asr.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.workspaces_left(), 0);
    }

    #[tokio::test]
    async fn oversized_and_missing_sources_are_input_errors() {
        let fx = Fixture::new();
        let config = PipelineConfig {
            max_input_bytes: 2,
            ..fx.config()
        };
        let pipeline = fx.pipeline(
            config,
            Arc::new(FakeAsr::new(three_segments())),
            Arc::new(MockTr { fail_on: None }),
            Arc::new(FakeMedia::new(Duration::from_secs(10), true)),
        );
        let report = pipeline.process(fx.request(), None).await.unwrap();
        assert_eq!(report.error.unwrap().kind, ErrorKind::InputError);

        let missing = JobRequest::new(MediaSource::Path(fx.out.path().join("nope.mp4")), fx.out.path());
        let report = pipeline.process(missing, None).await.unwrap();
        assert_eq!(report.error.unwrap().kind, ErrorKind::InputError);
        assert_eq!(fx.workspaces_left(), 0);
    }

    #[tokio::test]
    async fn too_long_videos_are_rejected() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(
            fx.config(),
            Arc::new(FakeAsr::new(three_segments())),
            Arc::new(MockTr { fail_on: None }),
            Arc::new(FakeMedia::new(Duration::from_secs(601), true)),
        );
        let report = pipeline.process(fx.request(), None).await.unwrap();
        assert_eq!(report.error.unwrap().kind, ErrorKind::InputError);
    }

    #[tokio::test]
    async fn duration_mismatch_is_an_encode_error_without_delivery() {
        let fx = Fixture::new();
        let mut media = FakeMedia::new(Duration::from_secs(10), true);
        media.output_duration = Duration::from_secs(8);
        let pipeline = fx.pipeline(
            fx.config(),
            Arc::new(FakeAsr::new(three_segments())),
            Arc::new(MockTr { fail_on: None }),
            Arc::new(media),
        );
        let report = pipeline.process(fx.request(), None).await.unwrap();
        assert_eq!(report.error.unwrap().kind, ErrorKind::EncodeError);
        assert!(report.output.is_none());
        assert_eq!(std::fs::read_dir(fx.out.path()).unwrap().count(), 0);
        assert_eq!(fx.workspaces_left(), 0);
    }

    #[tokio::test]
    async fn each_subtitle_is_shaped_exactly_once() {
        let fx = Fixture::new();
        let shaper = Arc::new(CountingShaper::default());
        let pipeline = fx
            .pipeline(
                fx.config(),
                Arc::new(FakeAsr::new(three_segments())),
                Arc::new(MockTr { fail_on: None }),
                Arc::new(FakeMedia::new(Duration::from_secs(10), true)),
            )
            .with_shaper(shaper.clone());
        let report = pipeline.process(fx.request(), None).await.unwrap();
        assert!(report.is_success());
        assert_eq!(shaper.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn supplied_transcript_skips_asr() {
        let fx = Fixture::new();
        let asr = Arc::new(FakeAsr::new(Vec::new()));
        let pipeline = fx.pipeline(
            fx.config(),
            asr.clone(),
            Arc::new(MockTr { fail_on: None }),
            Arc::new(FakeMedia::new(Duration::from_secs(10), true)),
        );
        let cues = srt::parse("1\n00:00:01,000 --> 00:00:02,000\nHi there\n").unwrap();
        let report = pipeline
            .process(fx.request().with_transcript(cues).with_target_language("ar"), None)
            .await
            .unwrap();
        assert!(report.is_success());
        assert_eq!(report.segments, 1);
        assert_eq!(asr.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn progress_reports_every_state_in_order() {
        let fx = Fixture::new();
        let seen: Arc<Mutex<Vec<JobProgress>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let progress: ProgressFn = Arc::new(move |p: &JobProgress| sink.lock().unwrap().push(p.clone()));
        let pipeline = fx.pipeline(
            fx.config(),
            Arc::new(FakeAsr::new(three_segments())),
            Arc::new(MockTr { fail_on: None }),
            Arc::new(FakeMedia::new(Duration::from_secs(10), true)),
        );
        pipeline.process(fx.request(), Some(progress)).await.unwrap();

        let seen = seen.lock().unwrap();
        let states: Vec<&str> = seen.iter().map(|p| p.state.as_str()).collect();
        assert_eq!(
            states,
            vec![
                "downloading",
                "audio_extracted",
                "transcribing",
                "translating",
                "rendering",
                "encoding",
                "delivering",
                "cleanup",
                "succeeded"
            ]
        );
        let translating = seen.iter().find(|p| p.state == JobState::Translating).unwrap();
        assert_eq!(translating.detail.as_deref(), Some("3 segment(s)"));
    }

    #[tokio::test]
    async fn pool_rejects_the_extra_job_without_blocking_the_others() {
        let fx = Fixture::new();
        let (open_tx, open_rx) = watch::channel(false);
        let mut asr = FakeAsr::new(three_segments());
        asr.gate = Some(open_rx);
        let pipeline = fx.pipeline(
            PipelineConfig {
                max_concurrent_jobs: 2,
                ..fx.config()
            },
            Arc::new(asr),
            Arc::new(MockTr { fail_on: None }),
            Arc::new(FakeMedia::new(Duration::from_secs(10), true)),
        );

        let first = pipeline.submit(fx.request(), None).unwrap();
        let second = pipeline.submit(fx.request(), None).unwrap();
        let third = pipeline.submit(fx.request(), None);
        assert!(matches!(third, Err(SubmitError::PoolFull { capacity: 2 })));

        open_tx.send(true).unwrap();
        assert!(first.join().await.is_success());
        assert!(second.join().await.is_success());
        assert_eq!(pipeline.pool().available(), 2);
        assert!(pipeline.submit(fx.request(), None).is_ok());
    }

    #[tokio::test]
    async fn cancelled_job_cleans_up() {
        let fx = Fixture::new();
        let (_open_tx, open_rx) = watch::channel(false);
        let mut asr = FakeAsr::new(three_segments());
        asr.gate = Some(open_rx);
        let pipeline = fx.pipeline(
            fx.config(),
            Arc::new(asr),
            Arc::new(MockTr { fail_on: None }),
            Arc::new(FakeMedia::new(Duration::from_secs(10), true)),
        );
        let handle = pipeline.submit(fx.request(), None).unwrap();
        handle.cancel();
        let report = handle.join().await;
        assert_eq!(report.error.unwrap().kind, ErrorKind::Cancelled);
        assert_eq!(fx.workspaces_left(), 0);
        assert_eq!(pipeline.pool().available(), pipeline.pool().capacity());
    }
}

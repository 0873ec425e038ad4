//! Job identity, lifecycle and reporting.

use serde::{Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::error::JobFailure;
use crate::schedule::OverlayInstruction;
use crate::translate::TranslatedSegment;

/// Unique identifier for a job; also names its workspace directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying uuid.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
}

/// Job lifecycle.
///
/// Stages run in declaration order. Any stage may fail, which moves the job
/// to `Cleanup(Failed)`; a delivered job moves to `Cleanup(Success)`. Cleanup
/// always precedes `Terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JobState {
    #[default]
    Created,
    Downloading,
    AudioExtracted,
    Transcribing,
    Translating,
    Rendering,
    Encoding,
    Delivering,
    Cleanup(Outcome),
    Terminal(Outcome),
}

impl JobState {
    /// Name used in progress events and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::Downloading => "downloading",
            JobState::AudioExtracted => "audio_extracted",
            JobState::Transcribing => "transcribing",
            JobState::Translating => "translating",
            JobState::Rendering => "rendering",
            JobState::Encoding => "encoding",
            JobState::Delivering => "delivering",
            JobState::Cleanup(Outcome::Success) => "cleanup",
            JobState::Cleanup(Outcome::Failed) => "cleanup_failed",
            JobState::Terminal(Outcome::Success) => "succeeded",
            JobState::Terminal(Outcome::Failed) => "failed",
        }
    }

    /// True once the job has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Terminal(_))
    }

    /// The state after this one on the success path.
    fn next_stage(&self) -> Option<JobState> {
        let next = match self {
            JobState::Created => JobState::Downloading,
            JobState::Downloading => JobState::AudioExtracted,
            JobState::AudioExtracted => JobState::Transcribing,
            JobState::Transcribing => JobState::Translating,
            JobState::Translating => JobState::Rendering,
            JobState::Rendering => JobState::Encoding,
            JobState::Encoding => JobState::Delivering,
            JobState::Delivering => JobState::Cleanup(Outcome::Success),
            JobState::Cleanup(outcome) => JobState::Terminal(*outcome),
            JobState::Terminal(_) => return None,
        };
        Some(next)
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_advance(&self, to: JobState) -> bool {
        match (self, to) {
            (JobState::Terminal(_), _) => false,
            (JobState::Cleanup(_), _) => self.next_stage() == Some(to),
            (_, JobState::Cleanup(Outcome::Failed)) => true,
            _ => self.next_stage() == Some(to),
        }
    }

    /// Move to `to`, rejecting illegal transitions.
    pub fn advance(&mut self, to: JobState) -> Result<(), IllegalTransition> {
        if !self.can_advance(to) {
            return Err(IllegalTransition { from: *self, to });
        }
        *self = to;
        Ok(())
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for JobState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal job transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: JobState,
    pub to: JobState,
}

/// Where the source video comes from.
#[derive(Debug, Clone)]
pub enum MediaSource {
    /// A file on disk. It is copied into the job workspace, never modified.
    Path(PathBuf),
    /// An in-memory upload, written into the job workspace.
    Bytes { file_name: String, data: Arc<Vec<u8>> },
}

/// A request to subtitle one video.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub source: MediaSource,
    /// Subtitle language; `None` uses the configured default.
    pub target_language: Option<String>,
    /// Finished artifacts are moved here.
    pub deliver_dir: PathBuf,
    /// Use these cues instead of calling the transcription service.
    pub transcript: Option<Vec<crate::srt::SrtCue>>,
}

impl JobRequest {
    /// Request for `source`, delivered into `deliver_dir`.
    pub fn new(source: MediaSource, deliver_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            target_language: None,
            deliver_dir: deliver_dir.into(),
            transcript: None,
        }
    }

    /// Subtitle in `language` instead of the default.
    pub fn with_target_language(mut self, language: impl Into<String>) -> Self {
        self.target_language = Some(language.into());
        self
    }

    /// Skip transcription and use `cues`.
    pub fn with_transcript(mut self, cues: Vec<crate::srt::SrtCue>) -> Self {
        self.transcript = Some(cues);
        self
    }
}

/// Mutable per-job record, owned by the task running the job.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub source_video_path: PathBuf,
    pub namespace: PathBuf,
    pub segments: Vec<TranslatedSegment>,
    pub overlays: Vec<OverlayInstruction>,
    pub output_path: Option<PathBuf>,
    pub state: JobState,
    /// Segments shown in the source language after translation failed.
    pub warnings: usize,
}

impl Job {
    /// Fresh job record in the `Created` state.
    pub fn new(id: JobId, namespace: PathBuf) -> Self {
        Self {
            id,
            source_video_path: PathBuf::new(),
            namespace,
            segments: Vec::new(),
            overlays: Vec::new(),
            output_path: None,
            state: JobState::Created,
            warnings: 0,
        }
    }
}

/// Emitted on every state change.
#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Progress observer supplied with a request.
pub type ProgressFn = Arc<dyn Fn(&JobProgress) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed,
}

/// Final, structured result of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub id: JobId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitles: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub warnings: usize,
    pub segments: usize,
}

impl JobReport {
    /// True when the job delivered its output.
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

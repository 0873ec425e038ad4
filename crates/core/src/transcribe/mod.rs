//! Speech-to-text boundary.
//! The core only consumes the service contract; the model runs elsewhere.

use async_trait::async_trait;
use std::path::Path;
use tracing::info;

use crate::error::{ExternalError, JobError};
use crate::retry::RetryPolicy;
use crate::transcript::RawSegment;

pub mod openai;

/// Produces time-stamped text from an audio file.
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Transcribe `audio`, returning segments in playback order.
    async fn transcribe(&self, audio: &Path, language: &str) -> Result<Vec<RawSegment>, ExternalError>;
}

/// Run the transcription under `policy`; exhaustion is fatal for the job.
pub async fn transcribe_with_retry(
    service: &dyn TranscriptionService,
    audio: &Path,
    language: &str,
    policy: &RetryPolicy,
) -> Result<Vec<RawSegment>, JobError> {
    let segments = policy
        .run("transcription", || service.transcribe(audio, language))
        .await
        .map_err(|exhausted| JobError::FatalExternal {
            service: "transcription",
            attempts: exhausted.attempts,
            source: exhausted.error,
        })?;
    info!("transcription returned {} segment(s)", segments.len());
    Ok(segments)
}

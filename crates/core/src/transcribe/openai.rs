//! Whisper transcription through an OpenAI-compatible `/audio/transcriptions` endpoint.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use tracing::trace;

use super::TranscriptionService;
use crate::error::ExternalError;
use crate::openai::{check_response, with_timeout, OpenAiEndpoint};
use crate::transcript::RawSegment;

/// Transcriber backed by the hosted Whisper API.
pub struct WhisperApiTranscriber {
    client: Client,
    endpoint: OpenAiEndpoint,
    model: String,
}

#[derive(Debug, Deserialize)]
struct VerboseTranscript {
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

impl WhisperApiTranscriber {
    /// Build a transcriber for `endpoint` using the default model.
    pub fn new(endpoint: OpenAiEndpoint) -> anyhow::Result<Self> {
        Ok(Self {
            client: endpoint.client()?,
            endpoint,
            model: "whisper-1".to_string(),
        })
    }

    /// Use another transcription model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl TranscriptionService for WhisperApiTranscriber {
    /// Upload the audio and ask for segment-level timestamps.
    async fn transcribe(&self, audio: &Path, language: &str) -> Result<Vec<RawSegment>, ExternalError> {
        trace!("transcribe audio={} language={}", audio.display(), language);
        let bytes = tokio::fs::read(audio)
            .await
            .map_err(|e| ExternalError::Rejected(format!("cannot read {}: {e}", audio.display())))?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.wav".to_string());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")
            .map_err(|e| ExternalError::Rejected(e.to_string()))?;
        let form = Form::new()
            .text("model", self.model.clone())
            .text("language", language.to_string())
            .text("response_format", "verbose_json")
            .part("file", part);

        let timeout = self.endpoint.timeout;
        let resp = self
            .client
            .post(self.endpoint.url("audio/transcriptions"))
            .bearer_auth(&self.endpoint.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| with_timeout(e.into(), timeout))?;
        let resp = check_response(resp).await?;
        let body: VerboseTranscript = resp
            .json()
            .await
            .map_err(|e| ExternalError::Malformed(e.to_string()))?;
        Ok(body
            .segments
            .into_iter()
            .map(|s| RawSegment::new(s.start, s.end, s.text))
            .collect())
    }
}

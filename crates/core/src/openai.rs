//! Shared plumbing for the OpenAI-compatible HTTP adapters.

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use std::time::Duration;

use crate::error::ExternalError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Endpoint and credentials for an OpenAI-compatible API.
#[derive(Debug, Clone)]
pub struct OpenAiEndpoint {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl OpenAiEndpoint {
    /// Read `OPENAI_API_KEY` and the optional `OPENAI_BASE_URL`.
    pub fn from_env(timeout: Duration) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            api_key,
            base_url,
            timeout,
        })
    }

    /// Endpoint with explicit values.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            timeout,
        }
    }

    /// Full URL for an API path such as `chat/completions`.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Build a client whose requests never outlive `timeout`.
    pub fn client(&self) -> anyhow::Result<Client> {
        Ok(Client::builder().timeout(self.timeout).build()?)
    }
}

/// Turn a non-success response into a classified [`ExternalError`].
pub(crate) async fn check_response(resp: Response) -> Result<Response, ExternalError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = resp.text().await.unwrap_or_default();
    let body: String = body.chars().take(200).collect();
    Err(ExternalError::from_status(status.as_u16(), body, retry_after))
}

/// Fill in the configured limit on timeouts coming from reqwest.
pub(crate) fn with_timeout(err: ExternalError, timeout: Duration) -> ExternalError {
    match err {
        ExternalError::Timeout(d) if d.is_zero() => ExternalError::Timeout(timeout),
        other => other,
    }
}

//! OpenAI-backed translator implementation.
//! One chat completion per subtitle segment.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::Translator;
use crate::error::ExternalError;
use crate::openai::{check_response, with_timeout, OpenAiEndpoint};

/// Translator that delegates to the OpenAI chat completion API.
pub struct OpenAiTranslator {
    client: Client,
    endpoint: OpenAiEndpoint,
    model: String,
}

impl OpenAiTranslator {
    /// Build a translator for `endpoint` using the default chat model.
    pub fn new(endpoint: OpenAiEndpoint) -> anyhow::Result<Self> {
        Ok(Self {
            client: endpoint.client()?,
            endpoint,
            model: "gpt-4o-mini".to_string(),
        })
    }

    /// Use another chat model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Send a JSON body to the chat completions endpoint and return the JSON response.
    async fn post_chat(&self, body: Value) -> Result<Value, ExternalError> {
        let timeout = self.endpoint.timeout;
        let resp = self
            .client
            .post(self.endpoint.url("chat/completions"))
            .bearer_auth(&self.endpoint.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| with_timeout(e.into(), timeout))?;
        let resp = check_response(resp).await?;
        resp.json()
            .await
            .map_err(|e| ExternalError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl Translator for OpenAiTranslator {
    /// Translate a single subtitle line, asking for the bare translation back.
    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, ExternalError> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {
                    "role": "system",
                    "content": format!(
                        "You translate video subtitles from language '{source}' to language '{target}'. \
                         Reply with the translation only, no quotes or notes."
                    )
                },
                {"role": "user", "content": text}
            ],
        });
        let value = self.post_chat(body).await?;
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| ExternalError::Malformed("missing message content".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::time::Duration;

    fn translator(server: &MockServer) -> OpenAiTranslator {
        let endpoint = OpenAiEndpoint::new("key", server.url("/v1"), Duration::from_secs(5));
        OpenAiTranslator::new(endpoint).unwrap()
    }

    #[tokio::test]
    async fn returns_message_content() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .body_contains("Hello");
                then.status(200).json_body(json!({
                    "choices": [{"message": {"role": "assistant", "content": " שלום \n"}}]
                }));
            })
            .await;
        let out = translator(&server).translate("Hello", "en", "he").await.unwrap();
        mock.assert_async().await;
        assert_eq!(out, "שלום");
    }

    #[tokio::test]
    async fn server_errors_are_retryable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(502).body("bad gateway");
            })
            .await;
        let err = translator(&server).translate("Hello", "en", "he").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, ExternalError::Server { status: 502, .. }));
    }

    #[tokio::test]
    async fn missing_content_is_malformed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(json!({"choices": []}));
            })
            .await;
        let err = translator(&server).translate("Hello", "en", "he").await.unwrap_err();
        assert!(matches!(err, ExternalError::Malformed(_)));
    }
}

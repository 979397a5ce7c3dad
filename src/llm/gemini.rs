//! Gemini `generateContent` backend.
//!
//! Request body:
//!
//! ```json
//! {"contents": [{"parts": [{"text": "..."}, {"text": "..."}]}]}
//! ```
//!
//! The reply is read from `candidates[0].content.parts[0].text`. The API key
//! travels as the `key` query parameter and is never included in errors or
//! logs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::CompletionClient;
use super::retry::{RetryPolicy, classify_status};
use crate::config::LlmConfig;
use crate::error::{PipelineError, Result};

/// Gemini REST client.
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ReplyPart>,
}

#[derive(Debug, Deserialize)]
struct ReplyPart {
    text: Option<String>,
}

/// Build the JSON request body for `generateContent`.
pub fn build_request_body(parts: &[String]) -> serde_json::Value {
    let request = GenerateRequest {
        contents: vec![Content {
            parts: parts
                .iter()
                .map(|text| TextPart {
                    text: text.as_str(),
                })
                .collect(),
        }],
    };
    serde_json::to_value(&request).unwrap_or_else(|_| serde_json::json!({}))
}

/// Extract the reply text from a `generateContent` response body.
pub fn parse_reply(body: &str) -> Result<String> {
    let response: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| PipelineError::permanent(format!("invalid response JSON: {e}")))?;

    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .ok_or_else(|| PipelineError::permanent("response has no candidate text"))
}

impl GeminiClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| PipelineError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            retry: config.retry.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    async fn send_once(&self, body: &serde_json::Value) -> Result<String> {
        let response = self
            .http
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| {
                // Strip the URL: it carries the key.
                let e = e.without_url();
                if e.is_timeout() {
                    PipelineError::Timeout(format!("completion request: {e}"))
                } else {
                    PipelineError::transient(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PipelineError::transient(format!("read body: {}", e.without_url())))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &text));
        }
        parse_reply(&text)
    }
}

#[async_trait]
impl CompletionClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, parts: &[String]) -> Result<String> {
        let body = build_request_body(parts);
        tracing::debug!(model = %self.model, parts = parts.len(), "sending completion request");
        self.retry.run(|_| self.send_once(&body)).await
    }
}

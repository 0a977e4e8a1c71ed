//! OpenAI-compatible Chat Completions generator.
//!
//! Sends one non-streaming request per call and returns
//! `choices[0].message.content` verbatim.

use async_trait::async_trait;
use serde::Deserialize;

use super::{Generator, LlmSettings, Message, prompt};
use crate::error::UpstreamError;
use crate::model::Candidate;

const SERVICE: &str = "llm";

/// Generator backed by `/chat/completions`.
#[derive(Clone)]
pub struct ChatCompletionsGenerator {
    http: reqwest::Client,
    url: String,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsGenerator")
            .field("url", &self.url)
            .field("settings", &self.settings)
            .finish()
    }
}

impl ChatCompletionsGenerator {
    /// Build a generator whose HTTP client enforces `settings.timeout`.
    pub fn new(settings: LlmSettings) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| UpstreamError::http(SERVICE, e))?;
        let url = settings.provider.build_chat_url(&settings.base_url);
        Ok(Self { http, url, settings })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatResponse {
    fn into_content(self) -> Result<String, UpstreamError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| UpstreamError::malformed(SERVICE, "response has no choices"))?;
        choice
            .message
            .and_then(|m| m.content)
            .ok_or_else(|| UpstreamError::malformed(SERVICE, "choices[0].message.content is missing"))
    }
}

#[async_trait]
impl Generator for ChatCompletionsGenerator {
    async fn generate(&self, question: &str, candidates: &[Candidate]) -> Result<String, UpstreamError> {
        let messages = prompt::build_messages(question, candidates, self.settings.max_candidate_chars);
        let body = ChatRequest {
            model: &self.settings.model,
            messages: &messages,
            stream: false,
        };

        let mut rb = self.http.post(&self.url).json(&body);
        rb = if self.settings.provider.uses_api_key_header() {
            rb.header("api-key", &self.settings.api_key)
        } else {
            rb.bearer_auth(&self.settings.api_key)
        };

        let resp = rb.send().await.map_err(|e| UpstreamError::http(SERVICE, e))?;
        let status = resp.status();
        tracing::debug!(status = status.as_u16(), model = %self.settings.model, "LLM responded");

        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            tracing::warn!(status = status.as_u16(), body = %body, "LLM returned non-success status");
            return Err(UpstreamError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        let payload: ChatResponse = resp
            .json()
            .await
            .map_err(|e| UpstreamError::malformed(SERVICE, e.to_string()))?;
        payload.into_content()
    }
}

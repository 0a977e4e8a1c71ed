//! Generative-model client.
//!
//! The recommender makes exactly one non-streaming chat call per request:
//! a fixed system instruction plus one user message listing the retrieved
//! course descriptions and the original question.
//!
//! # Overview
//!
//! - [`prompt`]: message assembly and per-candidate truncation
//! - [`provider`]: endpoint detection for OpenAI-compatible hosts
//! - [`ChatCompletionsGenerator`]: the HTTP [`Generator`]
//!
//! # Example
//!
//! ```rust,ignore
//! use rag_recommender::llm::{ChatCompletionsGenerator, LlmSettings};
//!
//! let settings = LlmSettings::new("https://api.deepseek.com", "sk-...", "deepseek-chat");
//! let generator = ChatCompletionsGenerator::new(settings)?;
//! ```

pub mod chat_completions;
pub mod prompt;
pub mod provider;

pub use chat_completions::ChatCompletionsGenerator;
pub use provider::Provider;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::UpstreamError;
use crate::model::Candidate;

/// Default per-candidate description budget, in characters.
pub const DEFAULT_MAX_CANDIDATE_CHARS: usize = 512;

/// LLM connection and model settings.
#[derive(Clone)]
pub struct LlmSettings {
    /// Base URL for the API (e.g., `https://api.deepseek.com`).
    pub base_url: String,
    /// API key sent with every call.
    pub api_key: String,
    /// Model identifier (e.g., `deepseek-chat`).
    pub model: String,
    /// Provider type, detected from `base_url` by [`LlmSettings::new`].
    pub provider: Provider,
    /// Upper bound for one generation call.
    pub timeout: Duration,
    /// Characters kept from each candidate description before `...`.
    pub max_candidate_chars: usize,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("provider", &self.provider)
            .field("timeout", &self.timeout)
            .field("max_candidate_chars", &self.max_candidate_chars)
            .finish()
    }
}

impl LlmSettings {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            provider: Provider::detect_from_url(&base_url),
            base_url,
            api_key: api_key.into(),
            model: model.into(),
            timeout: Duration::from_secs(60),
            max_candidate_chars: DEFAULT_MAX_CANDIDATE_CHARS,
        }
    }

    /// Azure needs the deployment name; other providers ignore it.
    #[must_use]
    pub fn with_azure_deployment(mut self, deployment_name: impl Into<String>, api_version: Option<String>) -> Self {
        if let Provider::AzureOpenAI {
            deployment_name: name,
            api_version: version,
        } = &mut self.provider
        {
            *name = deployment_name.into();
            if let Some(v) = api_version {
                *version = v;
            }
        }
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_candidate_chars(mut self, max: usize) -> Self {
        self.max_candidate_chars = max;
        self
    }
}

/// A message in the outbound conversation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
}

/// Produces the model's free-text reply for one question.
#[async_trait]
pub trait Generator: Send + Sync + std::fmt::Debug {
    /// Ask the model to pick from `candidates`.
    ///
    /// # Errors
    ///
    /// A transport failure, a non-success status, or a reply without
    /// message text.
    async fn generate(&self, question: &str, candidates: &[Candidate]) -> Result<String, UpstreamError>;
}

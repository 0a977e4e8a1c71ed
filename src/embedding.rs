//! Text → vector conversion.
//!
//! [`HttpEmbedder`] talks to a single-endpoint embedding service. Two reply
//! shapes are understood:
//!
//! - worker shape: `{"embedding": {"data": [[0.1, ...]]}}`
//! - OpenAI-compatible shape: `{"data": [{"embedding": [0.1, ...]}]}`

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::UpstreamError;

const SERVICE: &str = "embedding";

/// Converts question text into a dense vector.
#[async_trait]
pub trait Embedder: Send + Sync + std::fmt::Debug {
    /// Embed `text` as-is. The returned vector is never empty.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, UpstreamError>;
}

/// HTTP client for the embedding endpoint.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::http(SERVICE, e))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Option<WorkerEmbedding>,
    #[serde(default)]
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct WorkerEmbedding {
    #[serde(default)]
    data: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
}

impl EmbedResponse {
    fn into_vector(self) -> Result<Vec<f32>, UpstreamError> {
        let vector = self
            .embedding
            .and_then(|e| e.data.into_iter().next())
            .or_else(|| self.data.into_iter().next().map(|d| d.embedding))
            .ok_or_else(|| UpstreamError::malformed(SERVICE, "response has no embedding payload"))?;

        if vector.is_empty() {
            return Err(UpstreamError::malformed(SERVICE, "embedding vector is empty"));
        }
        Ok(vector)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, UpstreamError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&EmbedRequest { text })
            .send()
            .await
            .map_err(|e| UpstreamError::http(SERVICE, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(UpstreamError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        let payload: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| UpstreamError::malformed(SERVICE, e.to_string()))?;
        let vector = payload.into_vector()?;
        tracing::debug!(dimensions = vector.len(), "Question embedded");
        Ok(vector)
    }
}

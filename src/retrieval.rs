//! Nearest-neighbour candidate retrieval.
//!
//! Category filtering happens *after* the index query: the index returns the
//! `limit` nearest points and non-matching categories are discarded here.
//! A sparse category can therefore yield fewer than `limit` candidates, or
//! none. [`QdrantRetriever::with_filtered_limit_multiplier`] widens the index
//! query when a filter is active, at the cost of a larger response.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::UpstreamError;
use crate::model::{AttributeValue, Candidate};

const SERVICE: &str = "qdrant";

/// Searches the vector index.
#[async_trait]
pub trait Retriever: Send + Sync + std::fmt::Debug {
    /// Return up to `limit` candidates nearest to `vector`, keeping only
    /// those whose category equals `category` unless it is `0`.
    async fn search(
        &self,
        vector: &[f32],
        category: i64,
        limit: usize,
    ) -> Result<Vec<Candidate>, UpstreamError>;
}

/// Keep candidates whose `field` attribute equals `category`.
///
/// `0` keeps everything. Integer and integral float attributes both match;
/// candidates without the attribute, or with a non-numeric one, are dropped.
pub fn filter_by_category(candidates: Vec<Candidate>, field: &str, category: i64) -> Vec<Candidate> {
    if category == 0 {
        return candidates;
    }
    candidates
        .into_iter()
        .filter(|c| {
            c.attribute(field).and_then(AttributeValue::as_integer) == Some(category)
        })
        .collect()
}

/// Qdrant REST client for one collection.
#[derive(Clone)]
pub struct QdrantRetriever {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
    category_field: String,
    filtered_limit_multiplier: usize,
}

impl std::fmt::Debug for QdrantRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantRetriever")
            .field("base_url", &self.base_url)
            .field("collection", &self.collection)
            .field("category_field", &self.category_field)
            .field("filtered_limit_multiplier", &self.filtered_limit_multiplier)
            .finish()
    }
}

impl QdrantRetriever {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        collection: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::http(SERVICE, e))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            collection: collection.into(),
            category_field: "category".to_string(),
            filtered_limit_multiplier: 1,
        })
    }

    /// Payload key holding the category number.
    #[must_use]
    pub fn with_category_field(mut self, field: impl Into<String>) -> Self {
        self.category_field = field.into();
        self
    }

    /// Ask the index for `limit * multiplier` points when a filter is active.
    #[must_use]
    pub fn with_filtered_limit_multiplier(mut self, multiplier: usize) -> Self {
        self.filtered_limit_multiplier = multiplier.max(1);
        self
    }

    fn query_url(&self) -> String {
        format!("{}/collections/{}/points/query", self.base_url, self.collection)
    }

    fn index_limit(&self, category: i64, limit: usize) -> usize {
        if category == 0 {
            limit
        } else {
            limit.saturating_mul(self.filtered_limit_multiplier)
        }
    }
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    result: QueryResult,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    points: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: serde_json::Value,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    payload: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ScoredPoint {
    fn into_candidate(self) -> Candidate {
        let id = match self.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        let mut candidate = Candidate::new(id, self.score);
        for (key, value) in self.payload.unwrap_or_default() {
            if let Some(value) = AttributeValue::from_json(&value) {
                candidate.attributes.insert(key, value);
            }
        }
        candidate
    }
}

#[async_trait]
impl Retriever for QdrantRetriever {
    async fn search(
        &self,
        vector: &[f32],
        category: i64,
        limit: usize,
    ) -> Result<Vec<Candidate>, UpstreamError> {
        let body = QueryRequest {
            query: vector,
            limit: self.index_limit(category, limit),
            with_payload: true,
        };

        let mut rb = self.http.post(self.query_url()).json(&body);
        if let Some(key) = &self.api_key {
            rb = rb.header("api-key", key);
        }
        let resp = rb.send().await.map_err(|e| UpstreamError::http(SERVICE, e))?;

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

        let payload: QueryResponse = resp
            .json()
            .await
            .map_err(|e| UpstreamError::malformed(SERVICE, e.to_string()))?;

        let retrieved: Vec<Candidate> = payload
            .result
            .points
            .into_iter()
            .map(ScoredPoint::into_candidate)
            .collect();
        let retrieved_count = retrieved.len();

        let mut candidates = filter_by_category(retrieved, &self.category_field, category);
        candidates.truncate(limit);

        tracing::debug!(
            collection = %self.collection,
            category,
            retrieved = retrieved_count,
            kept = candidates.len(),
            "Index query complete"
        );
        Ok(candidates)
    }
}

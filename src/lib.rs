//! Course recommendation service.
//!
//! Answers free-text questions such as "courses without a final exam" by
//! retrieving nearby course descriptions from a vector index and asking a
//! generative model to choose among them. Every caller identity has a
//! weekly request allowance.
//!
//! # Architecture
//!
//! - **Server**: Axum HTTP surface with request ids, tracing and timeouts
//! - **Orchestrator**: quota check, embed, retrieve, generate, extract
//! - **Quota**: per-identity weekly counters in Redis or in memory
//! - **Providers**: embedding worker, Qdrant and an OpenAI-compatible LLM
//!
//! # Modules
//!
//! - [`orchestrator`]: the pipeline
//! - [`quota`]: allowance tracking and window arithmetic
//! - [`embedding`], [`retrieval`], [`llm`]: external collaborators
//! - [`extract`]: structured output recovery from model replies
//! - [`api`]: handlers, envelope and error mapping

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]

pub mod api;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod llm;
pub mod model;
pub mod orchestrator;
pub mod quota;
pub mod retrieval;
pub mod server;
pub mod telemetry;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::AppConfig;
use crate::orchestrator::Orchestrator;
use crate::quota::QuotaLimiter;

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Recommendation pipeline.
    pub orchestrator: Arc<Orchestrator>,
    /// Same limiter the pipeline uses, for read-only status queries.
    pub quota: Arc<dyn QuotaLimiter>,
    /// Global Configuration
    pub config: Arc<AppConfig>,
    pub started_at: DateTime<Utc>,
}

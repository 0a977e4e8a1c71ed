//! Error taxonomy for the recommendation pipeline.
//!
//! Every failure that leaves the [`Orchestrator`](crate::orchestrator::Orchestrator)
//! is a [`PipelineError`], and every [`PipelineError`] reduces to exactly one
//! [`ErrorKind`] so the transport layer can pick a status code without
//! inspecting messages.

use std::fmt;
use std::time::Duration;

/// Outward failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or empty input. Caller fault.
    Validation,
    /// The identity has no allowance left in the current window.
    Quota,
    /// A collaborator (store, embedding, index, model) failed.
    Upstream,
    /// The model reply could not be reduced to structured output.
    Parse,
}

impl ErrorKind {
    /// Stable lowercase name, used in response bodies and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Quota => "quota",
            Self::Upstream => "upstream",
            Self::Parse => "parse",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    QuotaCheck,
    Embed,
    Retrieve,
    Generate,
    Extract,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::QuotaCheck => "quota_check",
            Self::Embed => "embed",
            Self::Retrieve => "retrieve",
            Self::Generate => "generate",
            Self::Extract => "extract",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request field failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Failure talking to the shared counter store.
///
/// Exhaustion is *not* an error: [`QuotaLimiter::allow`](crate::quota::QuotaLimiter::allow)
/// reports it as `Ok(false)`.
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("quota store unavailable: {0}")]
    Store(#[from] redis::RedisError),

    #[error("unexpected quota store reply: {0}")]
    Protocol(String),
}

/// Failure of an external provider call.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Transport-level failure (connect, TLS, body read, client timeout).
    #[error("{service} request failed: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The provider answered with a non-success status.
    #[error("{service} returned status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// The provider answered, but not with the payload we need.
    #[error("malformed {service} response: {reason}")]
    Malformed {
        service: &'static str,
        reason: String,
    },
}

impl UpstreamError {
    pub fn http(service: &'static str, source: reqwest::Error) -> Self {
        Self::Http { service, source }
    }

    pub fn malformed(service: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            service,
            reason: reason.into(),
        }
    }
}

/// The model reply could not be reduced to a recommendation list.
///
/// Every variant carries the text it gave up on so the failure can be
/// diagnosed from logs alone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("delimiter {delimiter} not found in model reply: {reply:?}")]
    MissingDelimiter {
        delimiter: &'static str,
        reply: String,
    },

    #[error("no JSON array or object after delimiter: {fragment:?}")]
    MissingJson { fragment: String },

    #[error("invalid recommendation JSON ({reason}): {fragment:?}")]
    InvalidJson { reason: String, fragment: String },
}

impl ParseError {
    /// The text the extractor was looking at when it failed.
    pub fn fragment(&self) -> &str {
        match self {
            Self::MissingDelimiter { reply, .. } => reply,
            Self::MissingJson { fragment } | Self::InvalidJson { fragment, .. } => fragment,
        }
    }
}

/// Terminal failure of one pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("quota exhausted for identity {identity}")]
    QuotaExceeded { identity: String },

    #[error("quota check failed for identity {identity}: {source}")]
    QuotaStore {
        identity: String,
        #[source]
        source: QuotaError,
    },

    #[error("{stage} stage failed: {source}")]
    Upstream {
        stage: Stage,
        #[source]
        source: UpstreamError,
    },

    #[error("{stage} stage exceeded its deadline of {budget:?}")]
    DeadlineExceeded { stage: Stage, budget: Duration },

    #[error("extract stage failed: {0}")]
    Parse(#[from] ParseError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::QuotaExceeded { .. } => ErrorKind::Quota,
            Self::QuotaStore { .. } | Self::Upstream { .. } | Self::DeadlineExceeded { .. } => {
                ErrorKind::Upstream
            }
            Self::Parse(_) => ErrorKind::Parse,
        }
    }

    /// Stage the failure happened in, if it happened inside the pipeline.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Validation(_) => None,
            Self::QuotaExceeded { .. } | Self::QuotaStore { .. } => Some(Stage::QuotaCheck),
            Self::Upstream { stage, .. } | Self::DeadlineExceeded { stage, .. } => Some(*stage),
            Self::Parse(_) => Some(Stage::Extract),
        }
    }
}

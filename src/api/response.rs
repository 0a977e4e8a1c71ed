//! Response envelope and error mapping.
//!
//! Every body has the shape `{"status": "success" | "error", "data": ...}`.
//! Errors carry `data.message` and `data.kind`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::error::{ErrorKind, PipelineError, QuotaError};

#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub status: &'static str,
    pub data: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            status: "success",
            data,
        })
    }
}

/// A failure ready to be rendered as an error envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorKind::Validation, message)
    }

    /// The quota store could not be consulted.
    pub fn quota_store(err: &QuotaError) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Upstream,
            format!("quota status unavailable: {err}"),
        )
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            PipelineError::QuotaStore { .. } => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            PipelineError::Parse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.kind(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "status": "error",
            "data": {
                "message": self.message,
                "kind": self.kind.as_str(),
            }
        });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ParseError, Stage, UpstreamError, ValidationError};
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                PipelineError::Validation(ValidationError::new("userQuestion", "empty")),
                StatusCode::BAD_REQUEST,
            ),
            (
                PipelineError::QuotaExceeded {
                    identity: "d".into(),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                PipelineError::QuotaStore {
                    identity: "d".into(),
                    source: QuotaError::Protocol("x".into()),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                PipelineError::DeadlineExceeded {
                    stage: Stage::Generate,
                    budget: Duration::from_secs(60),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                PipelineError::Upstream {
                    stage: Stage::Embed,
                    source: UpstreamError::malformed("embedding", "empty"),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                PipelineError::Parse(ParseError::MissingJson {
                    fragment: "none".into(),
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status, expected);
        }
    }
}

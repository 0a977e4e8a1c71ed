use axum::{
    Extension, Json,
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    http::HeaderMap,
};
use chrono::Utc;
use serde::Serialize;

use super::request_id::RequestId;
use super::response::{ApiError, Envelope};
use crate::AppState;
use crate::error::ErrorKind;
use crate::model::{RecommendRequest, Recommendation};
use crate::quota::QuotaStatus;

/// Header carrying the caller identity.
pub const FINGERPRINT_HEADER: &str = "x-device-fingerprint";

#[derive(Debug, Serialize)]
pub struct RecommendData {
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthData {
    pub status: &'static str,
    pub uptime: String,
    pub uptime_secs: i64,
    pub started_at: String,
}

/// POST /rag
pub async fn recommend(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Envelope<RecommendData>>, ApiError> {
    let request_id = request_id.map_or_else(|| "-".to_string(), |Extension(RequestId(id))| id);
    let body = body.map_err(|rejection| {
        ApiError::new(rejection.status(), ErrorKind::Validation, rejection.body_text())
    })?;
    let request = decode_request(&body)?;
    let identity = fingerprint(&headers)?;

    match state.orchestrator.handle_request(request, identity).await {
        Ok(recommendations) => Ok(Envelope::success(RecommendData { recommendations })),
        Err(err) => {
            let kind = err.kind();
            let stage = err.stage().map_or("request", |s| s.as_str());
            match kind {
                ErrorKind::Validation | ErrorKind::Quota => tracing::info!(
                    request_id = %request_id,
                    identity = %identity,
                    kind = %kind,
                    stage,
                    error = %err,
                    "Recommendation refused"
                ),
                ErrorKind::Upstream | ErrorKind::Parse => tracing::error!(
                    request_id = %request_id,
                    identity = %identity,
                    kind = %kind,
                    stage,
                    error = %err,
                    "Recommendation failed"
                ),
            }
            Err(err.into())
        }
    }
}

/// GET /quota
pub async fn quota_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Envelope<QuotaStatus>>, ApiError> {
    let identity = fingerprint(&headers)?;
    let status = state.quota.status(identity).await.map_err(|e| {
        tracing::error!(identity = %identity, error = %e, "Quota status lookup failed");
        ApiError::quota_store(&e)
    })?;
    Ok(Envelope::success(status))
}

/// GET /healthz
pub async fn healthz(State(state): State<AppState>) -> Json<Envelope<HealthData>> {
    let uptime = (Utc::now() - state.started_at).num_seconds().max(0);
    Envelope::success(HealthData {
        status: "ok",
        uptime: format_uptime(uptime),
        uptime_secs: uptime,
        started_at: state.started_at.to_rfc3339(),
    })
}

/// Decode a JSON body strictly: unknown fields and trailing data are errors.
pub fn decode_request(body: &[u8]) -> Result<RecommendRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::validation("request body is empty"));
    }
    serde_json::from_slice(body).map_err(|e| ApiError::validation(format!("invalid request body: {e}")))
}

fn fingerprint(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(FINGERPRINT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::validation("missing X-Device-Fingerprint header"))
}

fn format_uptime(total_secs: i64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

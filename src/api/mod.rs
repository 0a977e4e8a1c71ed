//! HTTP surface.
//!
//! | Method | Path       | Purpose                                  |
//! |--------|------------|------------------------------------------|
//! | POST   | `/rag`     | run the recommendation pipeline          |
//! | GET    | `/quota`   | remaining allowance for the caller       |
//! | GET    | `/healthz` | liveness, uptime and start time          |
//!
//! The caller identity is read from `X-Device-Fingerprint`.

pub mod handlers;
pub mod request_id;
pub mod response;

use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;

pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
pub use response::{ApiError, Envelope};

/// Routes without middleware; see [`crate::server::build_router`].
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rag", post(handlers::recommend))
        .route("/quota", get(handlers::quota_status))
        .route("/healthz", get(handlers::healthz))
}

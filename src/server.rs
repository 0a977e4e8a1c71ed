use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, Request},
    http::StatusCode,
    middleware::Next,
    response::IntoResponse,
};
use chrono::Utc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::api::{self, ApiError, REQUEST_ID_HEADER};
use crate::config::{AppConfig, QuotaBackend};
use crate::embedding::HttpEmbedder;
use crate::error::ErrorKind;
use crate::llm::ChatCompletionsGenerator;
use crate::orchestrator::Orchestrator;
use crate::quota::{MemoryQuotaLimiter, QuotaLimiter, RedisQuotaLimiter};
use crate::retrieval::QdrantRetriever;

/// Extra time the outer timeout grants beyond the pipeline deadline, so the
/// pipeline's own 504 normally wins.
const TIMEOUT_GRACE: Duration = Duration::from_secs(1);

/// Wire every collaborator from `config`.
pub async fn build_state(config: Arc<AppConfig>) -> anyhow::Result<AppState> {
    let policy = config.quota_policy()?;
    let quota: Arc<dyn QuotaLimiter> = match config.quota.backend {
        QuotaBackend::Redis => Arc::new(RedisQuotaLimiter::connect(&config.quota.redis_url, policy).await?),
        QuotaBackend::Memory => {
            info!(limit = policy.limit, "Using in-process quota store");
            Arc::new(MemoryQuotaLimiter::new(policy))
        }
    };

    let embedder = HttpEmbedder::new(
        &config.embedding.endpoint,
        Duration::from_secs(config.embedding.timeout_secs),
    )?;

    let retriever = QdrantRetriever::new(
        &config.retrieval.qdrant_url,
        config.retrieval.qdrant_api_key.clone(),
        &config.retrieval.collection,
        Duration::from_secs(config.retrieval.timeout_secs),
    )?
    .with_category_field(&config.retrieval.category_field)
    .with_filtered_limit_multiplier(config.retrieval.filtered_limit_multiplier);

    let settings = config.llm_settings();
    info!(
        name: "llm.config.loaded",
        base_url = %settings.base_url,
        model = %settings.model,
        timeout_secs = settings.timeout.as_secs(),
        "LLM configuration loaded"
    );
    let generator = ChatCompletionsGenerator::new(settings)?;

    let orchestrator = Orchestrator::new(
        Arc::clone(&quota),
        Arc::new(embedder),
        Arc::new(retriever),
        Arc::new(generator),
        config.pipeline_options(),
    );

    Ok(AppState {
        orchestrator: Arc::new(orchestrator),
        quota,
        config,
        started_at: Utc::now(),
    })
}

/// Routes plus the middleware stack.
pub fn build_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.server.request_timeout_secs) + TIMEOUT_GRACE;
    let max_body_bytes = state.config.server.max_body_bytes;

    api::router()
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(axum::middleware::from_fn(move |req: Request, next: Next| async move {
            match tokio::time::timeout(timeout, next.run(req)).await {
                Ok(res) => res,
                Err(_) => ApiError::new(
                    StatusCode::GATEWAY_TIMEOUT,
                    ErrorKind::Upstream,
                    "request timed out",
                )
                .into_response(),
            }
        }))
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
            let request_id = req
                .headers()
                .get(&REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "http",
                method = %req.method(),
                uri = %req.uri(),
                request_id = %request_id,
            )
        }))
        .layer(axum::middleware::from_fn(api::request_id_middleware))
        .with_state(state)
}

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let state = build_state(Arc::clone(&config)).await?;
    let app = build_router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        quota_backend = config.quota.backend.as_str(),
        collection = %config.retrieval.collection,
        "Server started"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

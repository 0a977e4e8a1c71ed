//! Course recommendation server.
//!
//! Entry point: load `.env`, parse flags, install logging, load and validate
//! configuration, then serve.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use mimalloc::MiMalloc;

use rag_recommender::config::{AppConfig, Cli};
use rag_recommender::{server, telemetry};

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present) before clap reads env-backed flags
    let _ = dotenv();

    let cli = Cli::parse();
    telemetry::init(cli.log_json);

    let config = AppConfig::from_cli(&cli).context("Configuration error")?;
    tracing::info!(
        name: "config.loaded",
        bind = %config.bind_addr(),
        quota_backend = config.quota.backend.as_str(),
        quota_limit = config.quota.limit_per_identity,
        reset_weekday = %config.quota.reset_weekday,
        "Configuration loaded"
    );

    server::start_server(Arc::new(config)).await
}

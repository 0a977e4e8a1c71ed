//! Layered configuration.
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. a config file (`--config` / `CONFIG_FILE`, else `./config.{yaml,toml,json}`)
//! 3. `RAG__`-prefixed environment variables, e.g. `RAG__QUOTA__LIMIT_PER_IDENTITY=20`
//! 4. legacy variable names kept for existing deployments (`OPENAI_API_KEY`,
//!    `QDRANT_HOST`, `REDIS_HOST`, ...)
//! 5. command-line flags

use std::env;
use std::time::Duration;

use chrono::Weekday;
use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::llm::LlmSettings;
use crate::orchestrator::PipelineOptions;
use crate::quota::QuotaPolicy;

/// Default embedding worker.
pub const DEFAULT_EMBED_ENDPOINT: &str = "https://whuworkers.jeredgong.workers.dev";

#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Requests allowed per identity per window
    #[arg(long)]
    pub quota_limit: Option<i64>,

    /// Where quota counters live
    #[arg(long, value_enum)]
    pub quota_backend: Option<QuotaBackend>,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub quota: QuotaConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub max_body_bytes: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum QuotaBackend {
    Redis,
    Memory,
}

impl QuotaBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Redis => "redis",
            Self::Memory => "memory",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuotaConfig {
    pub backend: QuotaBackend,
    pub redis_url: String,
    pub limit_per_identity: i64,
    pub key_prefix: String,
    pub reset_weekday: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub collection: String,
    pub candidate_limit: usize,
    pub category_field: String,
    pub filtered_limit_multiplier: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_candidate_chars: usize,
    pub azure_deployment: Option<String>,
    pub azure_api_version: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args).map_err(|e| ConfigError::Message(e.to_string()))?;
        Self::from_cli(&cli)
    }

    /// Build and validate the configuration for already-parsed flags.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8091)?
            .set_default("server.request_timeout_secs", 90)?
            .set_default("server.max_body_bytes", 1_048_576)?
            .set_default("quota.backend", "redis")?
            .set_default("quota.redis_url", "redis://127.0.0.1:6379")?
            .set_default("quota.limit_per_identity", 10)?
            .set_default("quota.key_prefix", "limit:")?
            .set_default("quota.reset_weekday", "thu")?
            .set_default("embedding.endpoint", DEFAULT_EMBED_ENDPOINT)?
            .set_default("embedding.timeout_secs", 30)?
            .set_default("retrieval.qdrant_url", "")?
            .set_default("retrieval.collection", "courses")?
            .set_default("retrieval.candidate_limit", 100)?
            .set_default("retrieval.category_field", "category")?
            .set_default("retrieval.filtered_limit_multiplier", 1)?
            .set_default("retrieval.timeout_secs", 30)?
            .set_default("llm.base_url", "https://api.deepseek.com")?
            .set_default("llm.api_key", "")?
            .set_default("llm.model", "deepseek-chat")?
            .set_default("llm.timeout_secs", 60)?
            .set_default("llm.max_candidate_chars", 512)?;

        // 2. Config file
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        // 3. RAG__SECTION__KEY
        builder = builder.add_source(
            Environment::with_prefix("RAG")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        // 4. Legacy names
        if let Some(key) = non_empty_var("OPENAI_API_KEY") {
            builder = builder.set_override("llm.api_key", key)?;
        }
        if let Some(host) = non_empty_var("QDRANT_HOST") {
            builder = builder.set_override("retrieval.qdrant_url", qdrant_url_from_host(&host))?;
        }
        if let Some(key) = non_empty_var("QDRANT_API_KEY") {
            builder = builder.set_override("retrieval.qdrant_api_key", key)?;
        }
        let redis_host = non_empty_var("REDIS_HOST");
        let redis_password = non_empty_var("REDIS_PASSWORD");
        if redis_host.is_some() || redis_password.is_some() {
            let url = redis_url(
                redis_host.as_deref().unwrap_or("127.0.0.1:6379"),
                redis_password.as_deref(),
            );
            builder = builder.set_override("quota.redis_url", url)?;
        }
        if let Some(endpoint) = non_empty_var("EMBED_ENDPOINT") {
            builder = builder.set_override("embedding.endpoint", endpoint)?;
        }
        if let Some(addr) = non_empty_var("LISTEN_ADDR") {
            let (host, port) = split_listen_addr(&addr)?;
            builder = builder
                .set_override("server.host", host)?
                .set_override("server.port", i64::from(port))?;
        }

        // 5. Flags
        if let Some(host) = &cli.host {
            builder = builder.set_override("server.host", host.as_str())?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(limit) = cli.quota_limit {
            builder = builder.set_override("quota.limit_per_identity", limit)?;
        }
        if let Some(backend) = cli.quota_backend {
            builder = builder.set_override("quota.backend", backend.as_str())?;
        }

        let mut cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the service cannot run with.
    ///
    /// An LLM timeout longer than the request timeout is clamped rather than
    /// rejected.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.llm.api_key.trim().is_empty() {
            return Err(ConfigError::Message(
                "llm.api_key is required (RAG__LLM__API_KEY or OPENAI_API_KEY)".to_string(),
            ));
        }
        if self.retrieval.qdrant_url.trim().is_empty() {
            return Err(ConfigError::Message(
                "retrieval.qdrant_url is required (RAG__RETRIEVAL__QDRANT_URL or QDRANT_HOST)".to_string(),
            ));
        }
        if self.quota.limit_per_identity < 1 {
            return Err(ConfigError::Message(format!(
                "quota.limit_per_identity must be at least 1, got {}",
                self.quota.limit_per_identity
            )));
        }
        if self.retrieval.candidate_limit < 1 {
            return Err(ConfigError::Message(
                "retrieval.candidate_limit must be at least 1".to_string(),
            ));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "server.request_timeout_secs must be positive".to_string(),
            ));
        }
        self.reset_weekday()?;

        if self.llm.timeout_secs > self.server.request_timeout_secs {
            tracing::warn!(
                llm_timeout_secs = self.llm.timeout_secs,
                request_timeout_secs = self.server.request_timeout_secs,
                "LLM timeout exceeds request timeout; clamping"
            );
            self.llm.timeout_secs = self.server.request_timeout_secs;
        }
        Ok(())
    }

    pub fn reset_weekday(&self) -> Result<Weekday, ConfigError> {
        self.quota.reset_weekday.trim().parse::<Weekday>().map_err(|_| {
            ConfigError::Message(format!(
                "quota.reset_weekday {:?} is not a weekday",
                self.quota.reset_weekday
            ))
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn quota_policy(&self) -> Result<QuotaPolicy, ConfigError> {
        Ok(QuotaPolicy {
            limit: self.quota.limit_per_identity,
            key_prefix: self.quota.key_prefix.clone(),
            reset_weekday: self.reset_weekday()?,
        })
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            candidate_limit: self.retrieval.candidate_limit,
            request_timeout: Duration::from_secs(self.server.request_timeout_secs),
            generation_timeout: Duration::from_secs(self.llm.timeout_secs),
        }
    }

    pub fn llm_settings(&self) -> LlmSettings {
        let mut settings = LlmSettings::new(&self.llm.base_url, &self.llm.api_key, &self.llm.model)
            .with_timeout(Duration::from_secs(self.llm.timeout_secs))
            .with_max_candidate_chars(self.llm.max_candidate_chars);
        if let Some(deployment) = &self.llm.azure_deployment {
            settings = settings.with_azure_deployment(deployment, self.llm.azure_api_version.clone());
        }
        settings
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// `QDRANT_HOST` may be a bare cloud hostname or a full URL.
fn qdrant_url_from_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{host}:6333")
    }
}

fn redis_url(addr: &str, password: Option<&str>) -> String {
    let addr = addr.trim();
    if addr.starts_with("redis://") || addr.starts_with("rediss://") {
        return addr.to_string();
    }
    match password {
        Some(pw) => format!("redis://:{pw}@{addr}"),
        None => format!("redis://{addr}"),
    }
}

fn split_listen_addr(addr: &str) -> Result<(String, u16), ConfigError> {
    let invalid = || ConfigError::Message(format!("invalid LISTEN_ADDR {addr:?}, expected host:port"));
    let (host, port) = addr.trim().rsplit_once(':').ok_or_else(invalid)?;
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    Ok((host.to_string(), port))
}

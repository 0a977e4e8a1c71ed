use rag_recommender::config::{AppConfig, QuotaBackend};
use serial_test::serial;
use std::env;
use std::fs;

const MANAGED_VARS: &[&str] = &[
    "CONFIG_FILE",
    "LOG_JSON",
    "OPENAI_API_KEY",
    "QDRANT_HOST",
    "QDRANT_API_KEY",
    "REDIS_HOST",
    "REDIS_PASSWORD",
    "EMBED_ENDPOINT",
    "LISTEN_ADDR",
    "RAG__LLM__API_KEY",
    "RAG__LLM__TIMEOUT_SECS",
    "RAG__RETRIEVAL__QDRANT_URL",
    "RAG__QUOTA__LIMIT_PER_IDENTITY",
    "RAG__QUOTA__RESET_WEEKDAY",
    "RAG__SERVER__PORT",
];

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    unsafe {
        for var in MANAGED_VARS {
            env::remove_var(var);
        }
    }
}

fn set_required() {
    unsafe {
        env::set_var("RAG__LLM__API_KEY", "sk-test");
        env::set_var("RAG__RETRIEVAL__QDRANT_URL", "http://localhost:6333");
    }
}

fn load(args: &[&str]) -> Result<AppConfig, config::ConfigError> {
    let mut argv = vec!["rag-recommender"];
    argv.extend_from_slice(args);
    AppConfig::load_from_args(argv)
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();
    set_required();

    let config = load(&[]).expect("defaults plus required keys should load");
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 8091);
    assert_eq!(config.server.max_body_bytes, 1_048_576);
    assert_eq!(config.quota.backend, QuotaBackend::Redis);
    assert_eq!(config.quota.limit_per_identity, 10);
    assert_eq!(config.quota.key_prefix, "limit:");
    assert_eq!(config.retrieval.collection, "courses");
    assert_eq!(config.retrieval.candidate_limit, 100);
    assert_eq!(config.retrieval.filtered_limit_multiplier, 1);
    assert_eq!(config.llm.model, "deepseek-chat");
    assert_eq!(config.llm.max_candidate_chars, 512);
    assert_eq!(config.reset_weekday().unwrap(), chrono::Weekday::Thu);

    clear_env_vars();
}

#[test]
#[serial]
fn test_missing_api_key_is_rejected() {
    clear_env_vars();
    unsafe {
        env::set_var("RAG__RETRIEVAL__QDRANT_URL", "http://localhost:6333");
    }

    let err = load(&[]).unwrap_err();
    assert!(err.to_string().contains("llm.api_key"), "{err}");

    clear_env_vars();
}

#[test]
#[serial]
fn test_legacy_variables_are_mapped() {
    clear_env_vars();
    unsafe {
        env::set_var("OPENAI_API_KEY", "sk-legacy");
        env::set_var("QDRANT_HOST", "abc.us-west-1-0.aws.cloud.qdrant.io");
        env::set_var("QDRANT_API_KEY", "qdrant-secret");
        env::set_var("REDIS_HOST", "cache:6380");
        env::set_var("REDIS_PASSWORD", "pw");
        env::set_var("EMBED_ENDPOINT", "http://embed.local/embed");
        env::set_var("LISTEN_ADDR", "0.0.0.0:9000");
    }

    let config = load(&[]).expect("legacy variables should be enough");
    assert_eq!(config.llm.api_key, "sk-legacy");
    assert_eq!(
        config.retrieval.qdrant_url,
        "https://abc.us-west-1-0.aws.cloud.qdrant.io:6333"
    );
    assert_eq!(config.retrieval.qdrant_api_key.as_deref(), Some("qdrant-secret"));
    assert_eq!(config.quota.redis_url, "redis://:pw@cache:6380");
    assert_eq!(config.embedding.endpoint, "http://embed.local/embed");
    assert_eq!(config.bind_addr(), "0.0.0.0:9000");

    clear_env_vars();
}

#[test]
#[serial]
fn test_legacy_name_beats_prefixed_env() {
    clear_env_vars();
    set_required();
    unsafe {
        env::set_var("OPENAI_API_KEY", "sk-legacy");
    }

    let config = load(&[]).unwrap();
    assert_eq!(config.llm.api_key, "sk-legacy");

    clear_env_vars();
}

#[test]
#[serial]
fn test_flags_beat_environment() {
    clear_env_vars();
    set_required();
    unsafe {
        env::set_var("LISTEN_ADDR", "0.0.0.0:9000");
        env::set_var("RAG__QUOTA__LIMIT_PER_IDENTITY", "20");
    }

    let config = load(&["--port", "7000", "--quota-limit", "3", "--quota-backend", "memory"]).unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 7000);
    assert_eq!(config.quota.limit_per_identity, 3);
    assert_eq!(config.quota.backend, QuotaBackend::Memory);

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load_with_env_on_top() {
    clear_env_vars();
    set_required();

    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("recommender.yaml");
    fs::write(
        &file_path,
        r"
quota:
  limit_per_identity: 25
  reset_weekday: mon
retrieval:
  collection: courses_v2
  filtered_limit_multiplier: 4
",
    )
    .expect("Failed to write temp config");

    let path = file_path.to_str().unwrap();
    let config = load(&["--config", path]).expect("Failed to load config from file");
    assert_eq!(config.quota.limit_per_identity, 25);
    assert_eq!(config.retrieval.collection, "courses_v2");
    assert_eq!(config.retrieval.filtered_limit_multiplier, 4);
    assert_eq!(config.reset_weekday().unwrap(), chrono::Weekday::Mon);

    unsafe {
        env::set_var("RAG__QUOTA__LIMIT_PER_IDENTITY", "30");
    }
    let config = load(&["--config", path]).unwrap();
    assert_eq!(config.quota.limit_per_identity, 30);

    clear_env_vars();
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    clear_env_vars();
    set_required();

    assert!(load(&["--config", "/nonexistent/recommender.yaml"]).is_err());

    clear_env_vars();
}

#[test]
#[serial]
fn test_invalid_values_are_rejected() {
    clear_env_vars();
    set_required();

    assert!(load(&["--quota-limit", "0"]).is_err());

    unsafe {
        env::set_var("RAG__QUOTA__RESET_WEEKDAY", "someday");
    }
    let err = load(&[]).unwrap_err();
    assert!(err.to_string().contains("reset_weekday"), "{err}");

    clear_env_vars();
}

#[test]
#[serial]
fn test_llm_timeout_is_clamped_to_request_timeout() {
    clear_env_vars();
    set_required();
    unsafe {
        env::set_var("RAG__LLM__TIMEOUT_SECS", "300");
    }

    let config = load(&[]).unwrap();
    assert_eq!(config.llm.timeout_secs, config.server.request_timeout_secs);
    assert_eq!(
        config.pipeline_options().generation_timeout,
        config.pipeline_options().request_timeout
    );

    clear_env_vars();
}

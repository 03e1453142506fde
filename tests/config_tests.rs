// Config loading and validation tests

mod common;

use backfiller::config::AppConfig;
use common::TEST_CONFIG;

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(TEST_CONFIG).expect("load_from_str");
    assert_eq!(config.server.port, 8091);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.database.path, "data/test.db");
    assert_eq!(config.executor.poll_interval_secs, 30);
    assert_eq!(config.executor.chunk_width_days, 7);
    assert_eq!(config.tiers.default_max_days, 90);
    assert_eq!(config.tiers.max_days_for("free"), 30);
    assert_eq!(config.tiers.max_days_for("enterprise"), 365);
}

#[test]
fn test_unknown_tier_falls_back_to_default() {
    let config = AppConfig::load_from_str(TEST_CONFIG).expect("valid");
    assert_eq!(config.tiers.max_days_for("no-such-tier"), 90);
}

#[test]
fn test_executor_defaults_when_section_minimal() {
    let minimal = r#"
[server]
port = 8091
host = "127.0.0.1"

[database]
path = "data/test.db"
max_pool_size = 2

[executor]

[tiers]
"#;
    let config = AppConfig::load_from_str(minimal).expect("valid");
    assert_eq!(config.executor.poll_interval_secs, 30);
    assert_eq!(config.executor.max_jobs_per_cycle, 4);
    assert_eq!(config.executor.chunk_width_days, 7);
    assert_eq!(config.executor.stale_timeout_secs, 1800);
    assert_eq!(config.executor.max_retries, 3);
    assert_eq!(config.executor.retry_backoff_secs, 300);
    assert!(config.executor.transform_command.is_none());
    assert_eq!(config.tiers.default_max_days, 90);
}

#[test]
fn test_config_validation_rejects_invalid_port() {
    let bad = TEST_CONFIG.replace("port = 8091", "port = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("server.port"));
}

#[test]
fn test_config_validation_rejects_empty_db_path() {
    let bad = TEST_CONFIG.replace("path = \"data/test.db\"", "path = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("database.path"));
}

#[test]
fn test_config_validation_rejects_max_pool_size_zero() {
    let bad = TEST_CONFIG.replace("max_pool_size = 2", "max_pool_size = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("max_pool_size"));
}

#[test]
fn test_config_validation_rejects_poll_interval_zero() {
    let bad = TEST_CONFIG.replace("poll_interval_secs = 30", "poll_interval_secs = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("poll_interval_secs"));
}

#[test]
fn test_config_validation_rejects_max_jobs_per_cycle_zero() {
    let bad = TEST_CONFIG.replace("max_jobs_per_cycle = 4", "max_jobs_per_cycle = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("max_jobs_per_cycle"));
}

#[test]
fn test_config_validation_rejects_chunk_width_zero() {
    let bad = TEST_CONFIG.replace("chunk_width_days = 7", "chunk_width_days = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("chunk_width_days"));
}

#[test]
fn test_config_validation_rejects_stale_timeout_zero() {
    let bad = TEST_CONFIG.replace("stale_timeout_secs = 1800", "stale_timeout_secs = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("stale_timeout_secs"));
}

#[test]
fn test_config_validation_rejects_tier_limit_zero() {
    let bad = TEST_CONFIG.replace("free = 30", "free = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("tiers.limits.free"));
}

#[test]
fn test_config_validation_rejects_invalid_toml() {
    let err = AppConfig::load_from_str("not valid toml [[[").unwrap_err();
    assert!(!err.to_string().is_empty());
}

#[test]
fn test_config_load_from_file_via_env() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, TEST_CONFIG).unwrap();
    unsafe { std::env::set_var("CONFIG_FILE", path.to_str().unwrap()) };
    let result = AppConfig::load();
    unsafe { std::env::remove_var("CONFIG_FILE") };
    let config = result.expect("load from CONFIG_FILE");
    assert_eq!(config.server.port, 8091);
    assert_eq!(config.database.path, "data/test.db");
}

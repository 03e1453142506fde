use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub executor: ExecutorConfig,
    pub tiers: TierLimits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Seconds between executor cycles.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Cap on jobs executed per cycle (bounds cycle duration).
    #[serde(default = "default_max_jobs_per_cycle")]
    pub max_jobs_per_cycle: u32,
    /// Width of each chunk in days; the final chunk may be shorter.
    #[serde(default = "default_chunk_width_days")]
    pub chunk_width_days: u32,
    /// RUNNING jobs older than this are presumed abandoned and requeued.
    #[serde(default = "default_stale_timeout_secs")]
    pub stale_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay before a failed chunk is retried; scaled by attempt.
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
    /// Opaque transform executable invoked per chunk. None = no-op runner
    /// (dev and tests only).
    #[serde(default)]
    pub transform_command: Option<String>,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_max_jobs_per_cycle() -> u32 {
    4
}

fn default_chunk_width_days() -> u32 {
    7
}

fn default_stale_timeout_secs() -> u64 {
    1800
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_secs() -> u64 {
    300
}

/// Per-billing-tier ceiling on backfill span, in days. Unknown tiers fall
/// back to `default_max_days`. Loaded once at startup and passed by
/// reference; no global state.
#[derive(Debug, Clone, Deserialize)]
pub struct TierLimits {
    #[serde(default = "default_tier_max_days")]
    pub default_max_days: u32,
    #[serde(default)]
    pub limits: HashMap<String, u32>,
}

fn default_tier_max_days() -> u32 {
    90
}

impl TierLimits {
    pub fn max_days_for(&self, tier: &str) -> u32 {
        self.limits.get(tier).copied().unwrap_or(self.default_max_days)
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.executor.poll_interval_secs > 0,
            "executor.poll_interval_secs must be > 0, got {}",
            self.executor.poll_interval_secs
        );
        anyhow::ensure!(
            self.executor.max_jobs_per_cycle > 0,
            "executor.max_jobs_per_cycle must be > 0, got {}",
            self.executor.max_jobs_per_cycle
        );
        anyhow::ensure!(
            self.executor.chunk_width_days > 0,
            "executor.chunk_width_days must be > 0, got {}",
            self.executor.chunk_width_days
        );
        anyhow::ensure!(
            self.executor.stale_timeout_secs > 0,
            "executor.stale_timeout_secs must be > 0, got {}",
            self.executor.stale_timeout_secs
        );
        anyhow::ensure!(
            self.executor.retry_backoff_secs > 0,
            "executor.retry_backoff_secs must be > 0, got {}",
            self.executor.retry_backoff_secs
        );
        anyhow::ensure!(
            self.tiers.default_max_days > 0,
            "tiers.default_max_days must be > 0, got {}",
            self.tiers.default_max_days
        );
        for (tier, days) in &self.tiers.limits {
            anyhow::ensure!(*days > 0, "tiers.limits.{} must be > 0, got {}", tier, days);
        }
        Ok(())
    }
}

// Shared test helpers

use async_trait::async_trait;
use backfiller::audit::{AuditEmitter, AuditEvent, AuditSink};
use backfiller::config::{AppConfig, ExecutorConfig};
use backfiller::executor::{ChunkOutcome, ChunkRunner};
use backfiller::models::*;
use backfiller::store::JobStore;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;

pub const TEST_CONFIG: &str = r#"
[server]
port = 8091
host = "127.0.0.1"

[database]
path = "data/test.db"
max_pool_size = 2

[executor]
poll_interval_secs = 30
max_jobs_per_cycle = 4
chunk_width_days = 7
stale_timeout_secs = 1800
max_retries = 3
retry_backoff_secs = 300

[tiers]
default_max_days = 90

[tiers.limits]
free = 30
enterprise = 365
"#;

pub fn test_app_config() -> AppConfig {
    AppConfig::load_from_str(TEST_CONFIG).unwrap()
}

pub fn test_executor_config() -> ExecutorConfig {
    test_app_config().executor
}

/// Fresh store in a TempDir. The TempDir must outlive the store.
pub async fn open_store() -> (TempDir, Arc<JobStore>) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("backfill.db");
    let store = JobStore::connect(path.to_str().unwrap(), 2).await.unwrap();
    store.init().await.unwrap();
    (dir, Arc::new(store))
}

pub async fn seed_tenant(store: &JobStore, id: &str, tier: &str, status: TenantStatus) {
    store
        .upsert_tenant(&Tenant {
            id: id.into(),
            name: format!("Tenant {}", id),
            tier: tier.into(),
            status,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
}

pub fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

/// Audit sink that drops events (orchestration must not depend on it).
pub struct NullAudit;

#[async_trait]
impl AuditEmitter for NullAudit {
    async fn emit(&self, _event: AuditEvent) {}
}

pub fn null_audit() -> AuditSink {
    Arc::new(NullAudit)
}

/// Runner that fails the first `fail_first` invocations, then succeeds
/// returning `rows` per chunk. Counts calls.
pub struct ScriptedRunner {
    pub fail_first: u64,
    pub rows: i64,
    pub calls: AtomicU64,
}

impl ScriptedRunner {
    pub fn succeeding(rows: i64) -> Self {
        Self {
            fail_first: 0,
            rows,
            calls: AtomicU64::new(0),
        }
    }

    pub fn failing_first(fail_first: u64) -> Self {
        Self {
            fail_first,
            rows: 0,
            calls: AtomicU64::new(0),
        }
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChunkRunner for ScriptedRunner {
    async fn run(&self, _job: &BackfillJob) -> anyhow::Result<ChunkOutcome> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            anyhow::bail!("scripted failure {}", n + 1);
        }
        Ok(ChunkOutcome {
            rows_affected: self.rows,
        })
    }
}

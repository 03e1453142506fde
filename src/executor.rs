// Polling executor: reclaims stale jobs, plans newly approved requests,
// then claims and runs eligible chunks under the one-running-job-per-tenant
// cap. All state lives in the store; killing the process mid-chunk leaves a
// RUNNING row that a later cycle (on any worker) reclaims.

use crate::audit::{AuditEvent, AuditSink};
use crate::config::ExecutorConfig;
use crate::models::{BackfillJob, RequestStatus};
use crate::planner;
use crate::store::JobStore;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{Duration, interval};
use tracing::{debug, info, warn};

/// Result of running one chunk through the transform collaborator.
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub rows_affected: i64,
}

/// The external data-transformation command, opaque to the orchestrator.
#[async_trait]
pub trait ChunkRunner: Send + Sync {
    async fn run(&self, job: &BackfillJob) -> anyhow::Result<ChunkOutcome>;
}

/// Shells out to the configured transform executable with the chunk bounds
/// as arguments. Exit 0 = success; stdout (trimmed) is the affected row
/// count when it parses, 0 otherwise.
pub struct CommandRunner {
    command: String,
}

impl CommandRunner {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ChunkRunner for CommandRunner {
    async fn run(&self, job: &BackfillJob) -> anyhow::Result<ChunkOutcome> {
        let output = tokio::process::Command::new(&self.command)
            .arg(&job.tenant_id)
            .arg(job.source_system.as_str())
            .arg(job.chunk_start_date.to_string())
            .arg(job.chunk_end_date.to_string())
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "transform exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let rows_affected = stdout.trim().parse::<i64>().unwrap_or(0);
        Ok(ChunkOutcome { rows_affected })
    }
}

/// No-op runner for dev and tests (no transform_command configured).
pub struct NoopRunner;

#[async_trait]
impl ChunkRunner for NoopRunner {
    async fn run(&self, _job: &BackfillJob) -> anyhow::Result<ChunkOutcome> {
        Ok(ChunkOutcome { rows_affected: 0 })
    }
}

/// Store, runner, audit sink, and shutdown for the executor.
pub struct ExecutorDeps {
    pub store: Arc<JobStore>,
    pub runner: Arc<dyn ChunkRunner>,
    pub audit: AuditSink,
    pub shutdown_rx: tokio::sync::oneshot::Receiver<()>,
}

/// What one cycle did; logged each tick and asserted on in tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub reclaimed: u64,
    pub planned_requests: u64,
    pub executed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

pub fn spawn(deps: ExecutorDeps, config: ExecutorConfig) -> tokio::task::JoinHandle<()> {
    let ExecutorDeps {
        store,
        runner,
        audit,
        mut shutdown_rx,
    } = deps;

    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(config.poll_interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut cycle_errors: u64 = 0;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match run_cycle(&store, runner.as_ref(), &audit, &config).await {
                        Ok(stats) => {
                            if stats.executed > 0 || stats.reclaimed > 0 || stats.planned_requests > 0 {
                                info!(
                                    reclaimed = stats.reclaimed,
                                    planned = stats.planned_requests,
                                    executed = stats.executed,
                                    succeeded = stats.succeeded,
                                    failed = stats.failed,
                                    "executor cycle"
                                );
                            } else {
                                debug!("executor cycle: idle");
                            }
                        }
                        Err(e) => {
                            cycle_errors += 1;
                            warn!(error = %e, cycle_errors, "executor cycle failed");
                        }
                    }
                }
                _ = &mut shutdown_rx => {
                    debug!("Executor shutting down");
                    break;
                }
            }
        }
    })
}

/// One full cycle: stale reclaim, planning, claim-and-run. Public so tests
/// can drive the executor deterministically without the timer.
pub async fn run_cycle(
    store: &JobStore,
    runner: &dyn ChunkRunner,
    audit: &AuditSink,
    config: &ExecutorConfig,
) -> anyhow::Result<CycleStats> {
    let mut stats = CycleStats::default();
    let now = Utc::now();

    // 1. Crash recovery: RUNNING rows older than the timeout were abandoned
    // by a dead worker; put them back without burning an attempt.
    let stale_cutoff = now - ChronoDuration::seconds(config.stale_timeout_secs as i64);
    stats.reclaimed = store.requeue_stale(stale_cutoff).await?;
    if stats.reclaimed > 0 {
        info!(reclaimed = stats.reclaimed, "reclaimed stale jobs");
    }

    // 2. Plan approved requests that have no chunks yet. One bad request
    // must not starve the others.
    for request in store.list_approved_without_jobs().await? {
        match planner::plan_request(
            store,
            audit,
            &request,
            config.chunk_width_days,
            config.max_retries,
        )
        .await
        {
            Ok(n) if n > 0 => stats.planned_requests += 1,
            Ok(_) => {}
            Err(e) => {
                warn!(request_id = %request.id, error = %e, "planning failed");
                store
                    .set_request_last_error(&request.id, &e.to_string())
                    .await?;
            }
        }
    }

    // 3+4. Claim and run up to max_jobs_per_cycle jobs. Tenants that ran
    // this cycle are excluded from further claims, on top of the RUNNING
    // exclusion the claim query applies itself.
    let mut ran_this_cycle: Vec<String> = Vec::new();
    while stats.executed < config.max_jobs_per_cycle as u64 {
        let Some(job) = store.claim_next_job(&ran_this_cycle, Utc::now()).await? else {
            break;
        };
        stats.executed += 1;
        ran_this_cycle.push(job.tenant_id.clone());
        if execute_job(store, runner, audit, config, &job).await? {
            stats.succeeded += 1;
        } else {
            stats.failed += 1;
        }
    }

    Ok(stats)
}

/// Run one claimed job and record its outcome. Returns true on success.
async fn execute_job(
    store: &JobStore,
    runner: &dyn ChunkRunner,
    audit: &AuditSink,
    config: &ExecutorConfig,
    job: &BackfillJob,
) -> anyhow::Result<bool> {
    debug!(
        job_id = %job.id,
        request_id = %job.request_id,
        chunk_index = job.chunk_index,
        attempt = job.attempt,
        "running chunk"
    );
    let started = Instant::now();
    match runner.run(job).await {
        Ok(outcome) => {
            let duration_ms = started.elapsed().as_millis() as i64;
            store
                .mark_job_succeeded(&job.id, outcome.rows_affected, duration_ms)
                .await?;
            if store.all_chunks_succeeded(&job.request_id).await? {
                store
                    .transition_request(&job.request_id, RequestStatus::Completed)
                    .await?;
                info!(request_id = %job.request_id, "backfill request completed");
                audit
                    .emit(AuditEvent::Completed {
                        request_id: job.request_id.clone(),
                    })
                    .await;
            }
            Ok(true)
        }
        Err(e) => {
            let message = e.to_string();
            warn!(job_id = %job.id, chunk_index = job.chunk_index, error = %message, "chunk failed");
            store.mark_job_failed(&job.id, &message).await?;
            if job.attempt < job.max_retries {
                let backoff =
                    ChronoDuration::seconds(config.retry_backoff_secs as i64 * job.attempt);
                store.schedule_retry(&job.id, Utc::now() + backoff).await?;
            } else {
                // Retries exhausted: the chunk stays FAILED and the request
                // stays non-terminal until an operator intervenes.
                store
                    .set_request_last_error(&job.request_id, &message)
                    .await?;
                audit
                    .emit(AuditEvent::Failed {
                        request_id: job.request_id.clone(),
                        error: message,
                    })
                    .await;
            }
            Ok(false)
        }
    }
}

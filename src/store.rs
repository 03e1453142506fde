// SQLite job store: the single source of truth for requests, chunk jobs,
// and tenant records. Every orchestration transition is a row update here;
// workers hold no in-memory queue.

use crate::models::{
    BackfillJob, BackfillRequest, JobStatus, RequestStatus, SourceSystem, Tenant, TenantStatus,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

pub struct JobStore {
    pool: SqlitePool,
}

fn ts_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn ms_to_ts(ms: i64) -> anyhow::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| anyhow::anyhow!("invalid epoch millis: {}", ms))
}

fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("invalid date {:?}: {}", s, e))
}

impl JobStore {
    pub async fn connect(path: &str, max_pool_size: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                tier TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS backfill_requests (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                source_system TEXT NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                status TEXT NOT NULL,
                reason TEXT NOT NULL,
                requested_by TEXT NOT NULL,
                idempotency_key TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_requests_tenant_source
             ON backfill_requests(tenant_id, source_system, status)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS backfill_jobs (
                id TEXT PRIMARY KEY,
                request_id TEXT NOT NULL REFERENCES backfill_requests(id),
                tenant_id TEXT NOT NULL,
                source_system TEXT NOT NULL,
                chunk_start_date TEXT NOT NULL,
                chunk_end_date TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                status TEXT NOT NULL,
                attempt INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL,
                next_retry_at INTEGER,
                created_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER,
                rows_affected INTEGER,
                duration_ms INTEGER,
                error_message TEXT,
                metadata TEXT,
                UNIQUE(request_id, chunk_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_status_created
             ON backfill_jobs(status, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_request ON backfill_jobs(request_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ---- tenants ----

    pub async fn upsert_tenant(&self, tenant: &Tenant) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO tenants (id, name, tier, status, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.tier)
        .bind(tenant.status.as_str())
        .bind(ts_ms(tenant.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_tenant(&self, id: &str) -> anyhow::Result<Option<Tenant>> {
        let row = sqlx::query("SELECT id, name, tier, status, created_at FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let status_s: String = row.try_get("status")?;
        let status = TenantStatus::parse(&status_s)
            .ok_or_else(|| anyhow::anyhow!("unknown tenant status {:?}", status_s))?;
        Ok(Some(Tenant {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            tier: row.try_get("tier")?,
            status,
            created_at: ms_to_ts(row.try_get("created_at")?)?,
        }))
    }

    // ---- requests ----

    #[instrument(skip(self, request), fields(repo = "jobs", operation = "insert_request", request_id = %request.id))]
    pub async fn insert_request(&self, request: &BackfillRequest) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO backfill_requests
            (id, tenant_id, source_system, start_date, end_date, status, reason,
             requested_by, idempotency_key, created_at, updated_at, started_at,
             completed_at, last_error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(&request.id)
        .bind(&request.tenant_id)
        .bind(request.source_system.as_str())
        .bind(request.start_date.to_string())
        .bind(request.end_date.to_string())
        .bind(request.status.as_str())
        .bind(&request.reason)
        .bind(&request.requested_by)
        .bind(&request.idempotency_key)
        .bind(ts_ms(request.created_at))
        .bind(ts_ms(request.updated_at))
        .bind(request.started_at.map(ts_ms))
        .bind(request.completed_at.map(ts_ms))
        .bind(&request.last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_request(&self, id: &str) -> anyhow::Result<Option<BackfillRequest>> {
        let row = sqlx::query("SELECT * FROM backfill_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::parse_request_row(&r)).transpose()
    }

    pub async fn find_request_by_idempotency_key(
        &self,
        key: &str,
    ) -> anyhow::Result<Option<BackfillRequest>> {
        let row = sqlx::query("SELECT * FROM backfill_requests WHERE idempotency_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::parse_request_row(&r)).transpose()
    }

    /// First non-terminal request for (tenant, source) whose inclusive date
    /// interval intersects [start_date, end_date], if any.
    pub async fn find_overlapping_request(
        &self,
        tenant_id: &str,
        source_system: SourceSystem,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> anyhow::Result<Option<BackfillRequest>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM backfill_requests
            WHERE tenant_id = $1 AND source_system = $2
              AND status IN ('pending', 'approved', 'running')
              AND start_date <= $3 AND end_date >= $4
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(source_system.as_str())
        .bind(end_date.to_string())
        .bind(start_date.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Self::parse_request_row(&r)).transpose()
    }

    pub async fn list_requests(
        &self,
        tenant_id: Option<&str>,
        status: Option<RequestStatus>,
    ) -> anyhow::Result<Vec<BackfillRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM backfill_requests
            WHERE ($1 IS NULL OR tenant_id = $1)
              AND ($2 IS NULL OR status = $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::parse_request_row).collect()
    }

    /// Requests sitting in APPROVED with no chunk jobs yet (planner input).
    pub async fn list_approved_without_jobs(&self) -> anyhow::Result<Vec<BackfillRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT r.* FROM backfill_requests r
            WHERE r.status = 'approved'
              AND NOT EXISTS (SELECT 1 FROM backfill_jobs j WHERE j.request_id = r.id)
            ORDER BY r.created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::parse_request_row).collect()
    }

    /// Transition-checked status update; rejects moves the state machine
    /// does not allow.
    #[instrument(skip(self), fields(repo = "jobs", operation = "transition_request"))]
    pub async fn transition_request(
        &self,
        id: &str,
        next: RequestStatus,
    ) -> anyhow::Result<BackfillRequest> {
        let current = self
            .get_request(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("request {} not found", id))?;
        anyhow::ensure!(
            current.status.can_transition_to(next),
            "illegal request transition {} -> {} for {}",
            current.status.as_str(),
            next.as_str(),
            id
        );
        let now = ts_ms(Utc::now());
        sqlx::query(
            r#"
            UPDATE backfill_requests
            SET status = $2,
                updated_at = $3,
                started_at = CASE WHEN $2 = 'running' THEN $3 ELSE started_at END,
                completed_at = CASE WHEN $2 IN ('completed', 'failed', 'cancelled') THEN $3 ELSE completed_at END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(next.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        self.get_request(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("request {} vanished mid-update", id))
    }

    pub async fn set_request_last_error(&self, id: &str, error: &str) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE backfill_requests SET last_error = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(ts_ms(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- jobs ----

    /// Insert all chunk jobs for a request in one transaction. No-op when
    /// jobs already exist (re-entrant; the executor may retry planning).
    /// Returns the number inserted.
    #[instrument(skip(self, jobs), fields(repo = "jobs", operation = "insert_jobs", request_id = %request_id, jobs_count = jobs.len()))]
    pub async fn insert_jobs(&self, request_id: &str, jobs: &[BackfillJob]) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await?;

        let existing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM backfill_jobs WHERE request_id = $1")
                .bind(request_id)
                .fetch_one(&mut *tx)
                .await?;
        if existing > 0 {
            tx.rollback().await?;
            return Ok(0);
        }

        for job in jobs {
            sqlx::query(
                r#"
                INSERT INTO backfill_jobs
                (id, request_id, tenant_id, source_system, chunk_start_date,
                 chunk_end_date, chunk_index, status, attempt, max_retries,
                 next_retry_at, created_at, started_at, completed_at,
                 rows_affected, duration_ms, error_message, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
                "#,
            )
            .bind(&job.id)
            .bind(&job.request_id)
            .bind(&job.tenant_id)
            .bind(job.source_system.as_str())
            .bind(job.chunk_start_date.to_string())
            .bind(job.chunk_end_date.to_string())
            .bind(job.chunk_index)
            .bind(job.status.as_str())
            .bind(job.attempt)
            .bind(job.max_retries)
            .bind(job.next_retry_at.map(ts_ms))
            .bind(ts_ms(Utc::now()))
            .bind(job.started_at.map(ts_ms))
            .bind(job.completed_at.map(ts_ms))
            .bind(job.rows_affected)
            .bind(job.duration_ms)
            .bind(&job.error_message)
            .bind(job.metadata.as_ref().map(|m| m.to_string()))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(jobs.len() as u64)
    }

    pub async fn get_job(&self, id: &str) -> anyhow::Result<Option<BackfillJob>> {
        let row = sqlx::query("SELECT * FROM backfill_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::parse_job_row(&r)).transpose()
    }

    /// All jobs for a request, ordered by chunk_index.
    pub async fn jobs_for_request(&self, request_id: &str) -> anyhow::Result<Vec<BackfillJob>> {
        let rows = sqlx::query(
            "SELECT * FROM backfill_jobs WHERE request_id = $1 ORDER BY chunk_index ASC",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::parse_job_row).collect()
    }

    /// Tenants that currently have a RUNNING job anywhere in the system.
    pub async fn busy_tenants(&self) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT tenant_id FROM backfill_jobs WHERE status = 'running'",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Atomically claim the oldest eligible QUEUED job: flips it to RUNNING
    /// and increments attempt in one conditional UPDATE, so two worker
    /// processes can never claim the same row. Jobs whose tenant has a
    /// RUNNING job, appears in `excluded_tenants`, or whose next_retry_at
    /// is in the future are skipped. Among one request's chunks the lowest
    /// chunk_index wins.
    #[instrument(skip(self, excluded_tenants), fields(repo = "jobs", operation = "claim_next_job"))]
    pub async fn claim_next_job(
        &self,
        excluded_tenants: &[String],
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<BackfillJob>> {
        let mut sql = String::from(
            r#"
            UPDATE backfill_jobs
            SET status = 'running', attempt = attempt + 1, started_at = $1, next_retry_at = NULL
            WHERE id = (
                SELECT j.id FROM backfill_jobs j
                WHERE j.status = 'queued'
                  AND (j.next_retry_at IS NULL OR j.next_retry_at <= $1)
                  AND j.tenant_id NOT IN
                      (SELECT tenant_id FROM backfill_jobs WHERE status = 'running')
            "#,
        );
        if !excluded_tenants.is_empty() {
            sql.push_str("      AND j.tenant_id NOT IN (");
            for i in 0..excluded_tenants.len() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(&format!("${}", i + 2));
            }
            sql.push_str(")\n");
        }
        sql.push_str(
            r#"
                ORDER BY j.created_at ASC, j.chunk_index ASC
                LIMIT 1
            )
            AND status = 'queued'
            RETURNING *
            "#,
        );

        let mut query = sqlx::query(&sql).bind(ts_ms(now));
        for tenant in excluded_tenants {
            query = query.bind(tenant);
        }
        let row = query.fetch_optional(&self.pool).await?;
        row.map(|r| Self::parse_job_row(&r)).transpose()
    }

    /// Requeue RUNNING jobs whose started_at is older than the cutoff.
    /// Crash reclaim is not a retry, so the attempt counted by the claim
    /// is given back. Returns the number of jobs reclaimed.
    #[instrument(skip(self), fields(repo = "jobs", operation = "requeue_stale"))]
    pub async fn requeue_stale(&self, started_before: DateTime<Utc>) -> anyhow::Result<u64> {
        let r = sqlx::query(
            r#"
            UPDATE backfill_jobs
            SET status = 'queued', attempt = attempt - 1, started_at = NULL
            WHERE status = 'running' AND started_at < $1
            "#,
        )
        .bind(ts_ms(started_before))
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    #[instrument(skip(self), fields(repo = "jobs", operation = "mark_job_succeeded"))]
    pub async fn mark_job_succeeded(
        &self,
        id: &str,
        rows_affected: i64,
        duration_ms: i64,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE backfill_jobs
            SET status = 'succeeded', completed_at = $2, rows_affected = $3,
                duration_ms = $4, error_message = NULL
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(ts_ms(Utc::now()))
        .bind(rows_affected)
        .bind(duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, error), fields(repo = "jobs", operation = "mark_job_failed"))]
    pub async fn mark_job_failed(&self, id: &str, error: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE backfill_jobs
            SET status = 'failed', completed_at = $2, error_message = $3
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(ts_ms(Utc::now()))
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Put a failed job back in the queue for a later attempt. Clears the
    /// started/completed stamps so the stale reclaim never sees it.
    #[instrument(skip(self), fields(repo = "jobs", operation = "schedule_retry"))]
    pub async fn schedule_retry(
        &self,
        id: &str,
        next_retry_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE backfill_jobs
            SET status = 'queued', next_retry_at = $2, started_at = NULL, completed_at = NULL
            WHERE id = $1 AND status = 'failed'
            "#,
        )
        .bind(id)
        .bind(ts_ms(next_retry_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// True when every chunk of the request has SUCCEEDED.
    pub async fn all_chunks_succeeded(&self, request_id: &str) -> anyhow::Result<bool> {
        let remaining: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM backfill_jobs WHERE request_id = $1 AND status != 'succeeded'",
        )
        .bind(request_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(remaining == 0)
    }

    // ---- row parsing ----

    fn parse_request_row(row: &SqliteRow) -> anyhow::Result<BackfillRequest> {
        let source_s: String = row.try_get("source_system")?;
        let source_system = SourceSystem::parse(&source_s)
            .ok_or_else(|| anyhow::anyhow!("unknown source system {:?}", source_s))?;
        let status_s: String = row.try_get("status")?;
        let status = RequestStatus::parse(&status_s)
            .ok_or_else(|| anyhow::anyhow!("unknown request status {:?}", status_s))?;
        let start_s: String = row.try_get("start_date")?;
        let end_s: String = row.try_get("end_date")?;
        let started_at: Option<i64> = row.try_get("started_at")?;
        let completed_at: Option<i64> = row.try_get("completed_at")?;

        Ok(BackfillRequest {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            source_system,
            start_date: parse_date(&start_s)?,
            end_date: parse_date(&end_s)?,
            status,
            reason: row.try_get("reason")?,
            requested_by: row.try_get("requested_by")?,
            idempotency_key: row.try_get("idempotency_key")?,
            created_at: ms_to_ts(row.try_get("created_at")?)?,
            updated_at: ms_to_ts(row.try_get("updated_at")?)?,
            started_at: started_at.map(ms_to_ts).transpose()?,
            completed_at: completed_at.map(ms_to_ts).transpose()?,
            last_error: row.try_get("last_error")?,
        })
    }

    fn parse_job_row(row: &SqliteRow) -> anyhow::Result<BackfillJob> {
        let source_s: String = row.try_get("source_system")?;
        let source_system = SourceSystem::parse(&source_s)
            .ok_or_else(|| anyhow::anyhow!("unknown source system {:?}", source_s))?;
        let status_s: String = row.try_get("status")?;
        let status = JobStatus::parse(&status_s)
            .ok_or_else(|| anyhow::anyhow!("unknown job status {:?}", status_s))?;
        let start_s: String = row.try_get("chunk_start_date")?;
        let end_s: String = row.try_get("chunk_end_date")?;
        let next_retry_at: Option<i64> = row.try_get("next_retry_at")?;
        let started_at: Option<i64> = row.try_get("started_at")?;
        let completed_at: Option<i64> = row.try_get("completed_at")?;
        let metadata_s: Option<String> = row.try_get("metadata")?;
        let metadata = metadata_s
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .unwrap_or_else(|e| {
                tracing::debug!(error = %e, "unparseable job metadata, dropping");
                None
            });

        Ok(BackfillJob {
            id: row.try_get("id")?,
            request_id: row.try_get("request_id")?,
            tenant_id: row.try_get("tenant_id")?,
            source_system,
            chunk_start_date: parse_date(&start_s)?,
            chunk_end_date: parse_date(&end_s)?,
            chunk_index: row.try_get("chunk_index")?,
            status,
            attempt: row.try_get("attempt")?,
            max_retries: row.try_get("max_retries")?,
            next_retry_at: next_retry_at.map(ms_to_ts).transpose()?,
            started_at: started_at.map(ms_to_ts).transpose()?,
            completed_at: completed_at.map(ms_to_ts).transpose()?,
            rows_affected: row.try_get("rows_affected")?,
            duration_ms: row.try_get("duration_ms")?,
            error_message: row.try_get("error_message")?,
            metadata,
        })
    }
}

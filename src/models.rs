// Domain models: requests, chunk jobs, tenants, status enums.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Source systems a backfill can target. Closed set; unknown strings are
/// rejected at the boundary, not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSystem {
    Billing,
    Usage,
    Events,
    Crm,
}

impl SourceSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSystem::Billing => "billing",
            SourceSystem::Usage => "usage",
            SourceSystem::Events => "events",
            SourceSystem::Crm => "crm",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "billing" => Some(SourceSystem::Billing),
            "usage" => Some(SourceSystem::Usage),
            "events" => Some(SourceSystem::Events),
            "crm" => Some(SourceSystem::Crm),
            _ => None,
        }
    }
}

/// Request lifecycle. Terminal states admit no further automatic transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Running,
    Completed,
    Failed,
    Cancelled,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Running => "running",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
            RequestStatus::Cancelled => "cancelled",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "approved" => Some(RequestStatus::Approved),
            "running" => Some(RequestStatus::Running),
            "completed" => Some(RequestStatus::Completed),
            "failed" => Some(RequestStatus::Failed),
            "cancelled" => Some(RequestStatus::Cancelled),
            "rejected" => Some(RequestStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed
                | RequestStatus::Failed
                | RequestStatus::Cancelled
                | RequestStatus::Rejected
        )
    }

    /// Valid automatic transitions. Operator actions (cancel, reject) are
    /// checked at the boundary with the same predicate.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Approved, Running)
                | (Approved, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

/// Chunk job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Paused,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            "paused" => Some(JobStatus::Paused),
            _ => None,
        }
    }
}

/// Tenant lifecycle as seen by the validator. Only `Active` tenants may be
/// targeted by a backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Suspended,
    Deleted,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(TenantStatus::Active),
            "suspended" => Some(TenantStatus::Suspended),
            "deleted" => Some(TenantStatus::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub tier: String,
    pub status: TenantStatus,
    pub created_at: DateTime<Utc>,
}

/// One operator-issued reprocessing intent. Targets an arbitrary tenant
/// (privileged boundary), not scoped to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillRequest {
    pub id: String,
    pub tenant_id: String,
    pub source_system: SourceSystem,
    pub start_date: NaiveDate,
    /// Inclusive.
    pub end_date: NaiveDate,
    pub status: RequestStatus,
    pub reason: String,
    pub requested_by: String,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl BackfillRequest {
    /// Number of days covered, inclusive of both endpoints.
    pub fn span_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }
}

/// One date-bounded, independently retryable unit of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillJob {
    pub id: String,
    pub request_id: String,
    pub tenant_id: String,
    pub source_system: SourceSystem,
    pub chunk_start_date: NaiveDate,
    /// Inclusive.
    pub chunk_end_date: NaiveDate,
    pub chunk_index: i64,
    pub status: JobStatus,
    pub attempt: i64,
    pub max_retries: i64,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rows_affected: Option<i64>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl BackfillJob {
    /// Whether a failed job may still be rescheduled.
    pub fn can_retry(&self) -> bool {
        self.status == JobStatus::Failed && self.attempt < self.max_retries
    }
}

/// Deterministic key deduplicating identical submissions: hex SHA-256 of
/// the canonical `tenant|source|start|end` string.
pub fn idempotency_key(
    tenant_id: &str,
    source_system: SourceSystem,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> String {
    let canonical = format!(
        "{}|{}|{}|{}",
        tenant_id,
        source_system.as_str(),
        start_date,
        end_date
    );
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Derived request-level progress; computed by the StatusAggregator, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestProgress {
    pub status: RequestStatus,
    pub percent_complete: f64,
    pub total_chunks: u64,
    pub completed_chunks: u64,
    pub failed_chunks: u64,
    /// chunk_index of the single RUNNING job, if any.
    pub current_chunk: Option<i64>,
    pub failure_reasons: Vec<String>,
    pub estimated_seconds_remaining: Option<f64>,
}

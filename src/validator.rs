// Admission control for backfill requests. Each rejection is a typed
// variant so the HTTP boundary can map it to a distinct error code.

use crate::audit::{AuditEvent, AuditSink};
use crate::config::TierLimits;
use crate::models::{
    BackfillRequest, RequestStatus, SourceSystem, TenantStatus, idempotency_key,
};
use crate::store::JobStore;
use chrono::{NaiveDate, Utc};
use tracing::{info, instrument};

/// Free-text reason must say something.
const MIN_REASON_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("tenant {0} not found")]
    TenantNotFound(String),
    #[error("tenant {0} is not active")]
    TenantNotActive(String),
    #[error("date range of {days} days exceeds tier limit of {limit} days")]
    DateRangeExceeded { days: i64, limit: u32 },
    #[error("overlaps active backfill request {other_id}")]
    OverlappingBackfill { other_id: String },
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ValidationError {
    /// Machine-readable code surfaced at the boundary.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::TenantNotFound(_) => "tenant_not_found",
            ValidationError::TenantNotActive(_) => "tenant_not_active",
            ValidationError::DateRangeExceeded { .. } => "date_range_exceeded",
            ValidationError::OverlappingBackfill { .. } => "overlapping_backfill_exists",
            ValidationError::Invalid(_) => "validation_error",
            ValidationError::Internal(_) => "internal_error",
        }
    }
}

pub struct NewRequest {
    pub tenant_id: String,
    pub source_system: SourceSystem,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
    pub requested_by: String,
}

/// Result of admission: the request plus whether this call created it.
#[derive(Debug)]
pub struct AdmittedRequest {
    pub request: BackfillRequest,
    pub created: bool,
}

pub struct RequestValidator<'a> {
    store: &'a JobStore,
    tiers: &'a TierLimits,
    audit: &'a AuditSink,
}

impl<'a> RequestValidator<'a> {
    pub fn new(store: &'a JobStore, tiers: &'a TierLimits, audit: &'a AuditSink) -> Self {
        Self { store, tiers, audit }
    }

    /// Validate and admit a request. The idempotency lookup runs before any
    /// other check: replaying an already-admitted request must return it
    /// unchanged even if it would fail validation today (e.g. the range has
    /// since been covered by a completed run, or the tenant was suspended).
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, source = input.source_system.as_str()))]
    pub async fn admit(&self, input: NewRequest) -> Result<AdmittedRequest, ValidationError> {
        let key = idempotency_key(
            &input.tenant_id,
            input.source_system,
            input.start_date,
            input.end_date,
        );
        if let Some(existing) = self
            .store
            .find_request_by_idempotency_key(&key)
            .await
            .map_err(ValidationError::Internal)?
        {
            info!(request_id = %existing.id, "idempotent replay, returning existing request");
            return Ok(AdmittedRequest {
                request: existing,
                created: false,
            });
        }

        if input.start_date > input.end_date {
            return Err(ValidationError::Invalid(format!(
                "start_date {} is after end_date {}",
                input.start_date, input.end_date
            )));
        }
        let today = Utc::now().date_naive();
        if input.end_date > today {
            return Err(ValidationError::Invalid(format!(
                "end_date {} is in the future",
                input.end_date
            )));
        }
        if input.reason.trim().len() < MIN_REASON_LEN {
            return Err(ValidationError::Invalid(format!(
                "reason must be at least {} characters",
                MIN_REASON_LEN
            )));
        }

        let tenant = self
            .store
            .get_tenant(&input.tenant_id)
            .await
            .map_err(ValidationError::Internal)?
            .ok_or_else(|| ValidationError::TenantNotFound(input.tenant_id.clone()))?;
        if tenant.status != TenantStatus::Active {
            return Err(ValidationError::TenantNotActive(input.tenant_id.clone()));
        }

        let days = (input.end_date - input.start_date).num_days() + 1;
        let limit = self.tiers.max_days_for(&tenant.tier);
        if days > limit as i64 {
            return Err(ValidationError::DateRangeExceeded { days, limit });
        }

        if let Some(other) = self
            .store
            .find_overlapping_request(
                &input.tenant_id,
                input.source_system,
                input.start_date,
                input.end_date,
            )
            .await
            .map_err(ValidationError::Internal)?
        {
            return Err(ValidationError::OverlappingBackfill { other_id: other.id });
        }

        // Auto-approve policy: admitted requests go straight to APPROVED so
        // the executor picks them up on its next cycle.
        let now = Utc::now();
        let request = BackfillRequest {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: input.tenant_id,
            source_system: input.source_system,
            start_date: input.start_date,
            end_date: input.end_date,
            status: RequestStatus::Approved,
            reason: input.reason,
            requested_by: input.requested_by,
            idempotency_key: key,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            last_error: None,
        };
        self.store
            .insert_request(&request)
            .await
            .map_err(ValidationError::Internal)?;
        info!(request_id = %request.id, days, "backfill request admitted");
        self.audit
            .emit(AuditEvent::RequestCreated {
                request_id: request.id.clone(),
                tenant_id: request.tenant_id.clone(),
            })
            .await;

        Ok(AdmittedRequest {
            request,
            created: true,
        })
    }
}

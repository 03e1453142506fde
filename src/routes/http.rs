// Operator endpoints: create backfill, query status, list requests.
// Validation failures map to distinct machine-readable codes; raw executor
// errors never leave the store (operators see stored error_message only).

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::NaiveDate;
use serde::Deserialize;

use super::AppState;
use crate::models::{RequestStatus, SourceSystem};
use crate::status;
use crate::validator::{NewRequest, RequestValidator, ValidationError};
use crate::version::{NAME, VERSION};

/// GET /version — returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateBackfillBody {
    tenant_id: String,
    source_system: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    reason: String,
    #[serde(default)]
    requested_by: Option<String>,
}

fn error_response(code: &str, message: String, status: StatusCode) -> axum::response::Response {
    (
        status,
        Json(serde_json::json!({
            "error_code": code,
            "message": message,
        })),
    )
        .into_response()
}

fn validation_status(err: &ValidationError) -> StatusCode {
    match err {
        ValidationError::TenantNotFound(_) => StatusCode::NOT_FOUND,
        ValidationError::OverlappingBackfill { .. } => StatusCode::CONFLICT,
        ValidationError::TenantNotActive(_)
        | ValidationError::DateRangeExceeded { .. }
        | ValidationError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ValidationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /api/backfills — admit a backfill request. Replaying identical
/// input returns the existing request with created=false.
pub(super) async fn create_backfill_handler(
    State(state): State<AppState>,
    Json(body): Json<CreateBackfillBody>,
) -> axum::response::Response {
    let Some(source_system) = SourceSystem::parse(&body.source_system) else {
        return error_response(
            "validation_error",
            format!("unknown source_system {:?}", body.source_system),
            StatusCode::UNPROCESSABLE_ENTITY,
        );
    };

    let validator = RequestValidator::new(&state.store, &state.config.tiers, &state.audit);
    let input = NewRequest {
        tenant_id: body.tenant_id,
        source_system,
        start_date: body.start_date,
        end_date: body.end_date,
        reason: body.reason,
        requested_by: body.requested_by.unwrap_or_else(|| "operator".into()),
    };

    match validator.admit(input).await {
        Ok(admitted) => {
            let status = if admitted.created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            let message = if admitted.created {
                "backfill request created"
            } else {
                "identical request already exists"
            };
            (
                status,
                Json(serde_json::json!({
                    "request": admitted.request,
                    "created": admitted.created,
                    "message": message,
                })),
            )
                .into_response()
        }
        Err(e) => {
            if matches!(e, ValidationError::Internal(_)) {
                tracing::warn!(error = %e, "create backfill failed");
            }
            error_response(e.code(), e.to_string(), validation_status(&e))
        }
    }
}

/// GET /api/backfills/{id}/status — request plus derived progress.
pub(super) async fn backfill_status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let request = match state.store.get_request(&id).await {
        Ok(Some(r)) => r,
        Ok(None) => {
            return error_response(
                "request_not_found",
                format!("backfill request {} not found", id),
                StatusCode::NOT_FOUND,
            );
        }
        Err(e) => {
            tracing::warn!(error = %e, "status lookup failed");
            return error_response(
                "internal_error",
                "status lookup failed".into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            );
        }
    };
    let jobs = match state.store.jobs_for_request(&id).await {
        Ok(jobs) => jobs,
        Err(e) => {
            tracing::warn!(error = %e, "status lookup failed");
            return error_response(
                "internal_error",
                "status lookup failed".into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            );
        }
    };
    let progress = status::aggregate(&request, &jobs);
    Json(serde_json::json!({
        "request": request,
        "progress": progress,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub(super) struct ListBackfillsQuery {
    tenant_id: Option<String>,
    status: Option<String>,
}

/// GET /api/backfills?tenant_id=&status= — request summaries.
pub(super) async fn list_backfills_handler(
    State(state): State<AppState>,
    Query(query): Query<ListBackfillsQuery>,
) -> axum::response::Response {
    let status_filter = match query.status.as_deref() {
        None => None,
        Some(s) => match RequestStatus::parse(s) {
            Some(parsed) => Some(parsed),
            None => {
                return error_response(
                    "validation_error",
                    format!("unknown status {:?}", s),
                    StatusCode::UNPROCESSABLE_ENTITY,
                );
            }
        },
    };
    match state
        .store
        .list_requests(query.tenant_id.as_deref(), status_filter)
        .await
    {
        Ok(requests) => Json(serde_json::json!({ "requests": requests })).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "list backfills failed");
            error_response(
                "internal_error",
                "list failed".into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    }
}

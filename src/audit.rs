// Lifecycle notifications to the external audit collaborator. Emission is
// best-effort: implementations are infallible from the orchestrator's view
// and a slow or broken sink must never affect job state.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub enum AuditEvent {
    RequestCreated {
        request_id: String,
        tenant_id: String,
    },
    ExecutionStarted {
        request_id: String,
        total_chunks: u64,
    },
    Paused {
        request_id: String,
    },
    Failed {
        request_id: String,
        error: String,
    },
    Completed {
        request_id: String,
    },
}

#[async_trait]
pub trait AuditEmitter: Send + Sync {
    async fn emit(&self, event: AuditEvent);
}

/// Default emitter: structured log lines. Stands in for the real audit
/// service in dev and tests.
pub struct LogAuditEmitter;

#[async_trait]
impl AuditEmitter for LogAuditEmitter {
    async fn emit(&self, event: AuditEvent) {
        match &event {
            AuditEvent::RequestCreated {
                request_id,
                tenant_id,
            } => info!(audit = "request_created", %request_id, %tenant_id),
            AuditEvent::ExecutionStarted {
                request_id,
                total_chunks,
            } => info!(audit = "execution_started", %request_id, total_chunks),
            AuditEvent::Paused { request_id } => info!(audit = "paused", %request_id),
            AuditEvent::Failed { request_id, error } => {
                info!(audit = "failed", %request_id, error = %error)
            }
            AuditEvent::Completed { request_id } => info!(audit = "completed", %request_id),
        }
    }
}

/// Shared handle passed to the validator and executor.
pub type AuditSink = Arc<dyn AuditEmitter>;

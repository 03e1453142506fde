// HTTP operator boundary

mod http;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::audit::AuditSink;
use crate::config::AppConfig;
use crate::store::JobStore;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Arc<JobStore>,
    pub(crate) audit: AuditSink,
    pub(crate) config: AppConfig,
}

pub fn app(store: Arc<JobStore>, audit: AuditSink, config: AppConfig) -> Router {
    let state = AppState {
        store,
        audit,
        config,
    };
    Router::new()
        .route("/", get(|| async { "backfiller: ok" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/backfills", post(http::create_backfill_handler)) // POST /api/backfills
        .route("/api/backfills", get(http::list_backfills_handler)) // GET /api/backfills
        .route(
            "/api/backfills/{id}/status",
            get(http::backfill_status_handler),
        ) // GET /api/backfills/{id}/status
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}

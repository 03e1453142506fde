// Integration tests: HTTP operator boundary end to end

mod common;

use axum_test::TestServer;
use backfiller::executor;
use backfiller::models::TenantStatus;
use backfiller::routes;
use backfiller::store::JobStore;
use common::{ScriptedRunner, null_audit, open_store, seed_tenant, test_app_config};
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;

async fn test_server() -> (TempDir, Arc<JobStore>, TestServer) {
    let (dir, store) = open_store().await;
    seed_tenant(&store, "acme", "standard", TenantStatus::Active).await;
    let app = routes::app(store.clone(), null_audit(), test_app_config());
    let server = TestServer::new(app);
    (dir, store, server)
}

fn create_body() -> Value {
    json!({
        "tenant_id": "acme",
        "source_system": "billing",
        "start_date": "2025-01-01",
        "end_date": "2025-03-31",
        "reason": "reprocess billing data after pricing fix",
        "requested_by": "ops@example.com",
    })
}

#[tokio::test]
async fn version_endpoint_reports_name_and_version() {
    let (_dir, _store, server) = test_server().await;
    let response = server.get("/version").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["name"], "backfiller");
    assert!(!body["version"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn create_then_replay_is_idempotent_over_http() {
    let (_dir, _store, server) = test_server().await;

    let first = server.post("/api/backfills").json(&create_body()).await;
    first.assert_status(axum::http::StatusCode::CREATED);
    let first_body: Value = first.json();
    assert_eq!(first_body["created"], true);
    let id = first_body["request"]["id"].as_str().unwrap().to_string();
    let key = first_body["request"]["idempotency_key"].as_str().unwrap().to_string();

    let replay = server.post("/api/backfills").json(&create_body()).await;
    replay.assert_status_ok();
    let replay_body: Value = replay.json();
    assert_eq!(replay_body["created"], false);
    assert_eq!(replay_body["request"]["id"], id.as_str());
    assert_eq!(replay_body["request"]["idempotency_key"], key.as_str());
}

#[tokio::test]
async fn validation_failures_map_to_distinct_codes() {
    let (_dir, _store, server) = test_server().await;

    let mut unknown_tenant = create_body();
    unknown_tenant["tenant_id"] = json!("ghost");
    let response = server.post("/api/backfills").json(&unknown_tenant).await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error_code"], "tenant_not_found");

    server.post("/api/backfills").json(&create_body()).await.assert_status(axum::http::StatusCode::CREATED);
    let mut overlapping = create_body();
    overlapping["start_date"] = json!("2025-03-01");
    overlapping["end_date"] = json!("2025-04-30");
    let response = server.post("/api/backfills").json(&overlapping).await;
    response.assert_status(axum::http::StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["error_code"], "overlapping_backfill_exists");

    let mut bad_source = create_body();
    bad_source["source_system"] = json!("mainframe");
    let response = server.post("/api/backfills").json(&bad_source).await;
    response.assert_status(axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert_eq!(body["error_code"], "validation_error");
}

#[tokio::test]
async fn status_endpoint_reflects_executor_progress() {
    let (_dir, store, server) = test_server().await;

    let created = server.post("/api/backfills").json(&create_body()).await;
    let id = created.json::<Value>()["request"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let fresh = server.get(&format!("/api/backfills/{}/status", id)).await;
    fresh.assert_status_ok();
    let body: Value = fresh.json();
    assert_eq!(body["request"]["status"], "approved");
    assert_eq!(body["progress"]["total_chunks"], 0);

    // One executor cycle: plans 13 chunks and completes the first.
    let audit = null_audit();
    let runner = ScriptedRunner::succeeding(5);
    let config = test_app_config().executor;
    executor::run_cycle(&store, &runner, &audit, &config)
        .await
        .unwrap();

    let response = server.get(&format!("/api/backfills/{}/status", id)).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["request"]["status"], "running");
    assert_eq!(body["progress"]["total_chunks"], 13);
    assert_eq!(body["progress"]["completed_chunks"], 1);
    assert!(body["progress"]["estimated_seconds_remaining"].is_number());
}

#[tokio::test]
async fn list_endpoint_filters_by_tenant_and_status() {
    let (_dir, _store, server) = test_server().await;
    server.post("/api/backfills").json(&create_body()).await.assert_status(axum::http::StatusCode::CREATED);

    let all = server.get("/api/backfills").await;
    all.assert_status_ok();
    assert_eq!(all.json::<Value>()["requests"].as_array().unwrap().len(), 1);

    let approved = server.get("/api/backfills?tenant_id=acme&status=approved").await;
    assert_eq!(
        approved.json::<Value>()["requests"].as_array().unwrap().len(),
        1
    );

    let completed = server.get("/api/backfills?status=completed").await;
    assert_eq!(
        completed.json::<Value>()["requests"].as_array().unwrap().len(),
        0
    );

    let bad = server.get("/api/backfills?status=nonsense").await;
    bad.assert_status(axum::http::StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn missing_request_returns_not_found() {
    let (_dir, _store, server) = test_server().await;
    let response = server.get("/api/backfills/nope/status").await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error_code"], "request_not_found");
}

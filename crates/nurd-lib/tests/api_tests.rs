//! Integration tests for the query API and health endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use nurd_lib::{
    api::{create_router, AppState},
    health::{components, HealthRegistry},
    store::{MemorySnapshotStore, SnapshotStore},
    JobDescriptor, JobUsageSnapshot, PollerMetrics, RequestedResources, SchedulingType,
    UsageTotals,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
}

fn snapshot(cluster: &str, job_id: &str, cpu_ticks: f64, degraded: bool) -> JobUsageSnapshot {
    let job = JobDescriptor {
        job_id: job_id.to_string(),
        name: job_id.to_string(),
        scheduling_type: SchedulingType::Replicated,
        datacenters: vec!["dc1".to_string()],
        namespace: "default".to_string(),
    };
    JobUsageSnapshot::new(
        cluster,
        &job,
        UsageTotals {
            cpu_ticks,
            resident_memory_mb: 1.0,
            page_cache_mb: 0.5,
        },
        RequestedResources {
            cpu: 100.0,
            memory_mb: 256.0,
            disk_mb: 300.0,
            iops: 0.0,
        },
        degraded,
        at(0, 0),
    )
}

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let store = Arc::new(MemorySnapshotStore::new());
    store
        .insert_batch(
            &[snapshot("east", "web", 10.0, false), snapshot("west", "web", 5.0, true)],
            at(10, 0),
        )
        .await
        .unwrap();
    store
        .insert_batch(&[snapshot("east", "web", 20.0, false)], at(10, 15))
        .await
        .unwrap();
    store
        .insert_batch(&[snapshot("east", "api", 7.0, false)], at(10, 30))
        .await
        .unwrap();

    let health_registry = HealthRegistry::new();
    health_registry.register(components::POLLER).await;
    health_registry.register(components::STORE).await;

    let state = Arc::new(AppState::new(
        store,
        health_registry,
        PollerMetrics::new(),
    ));
    (create_router(state.clone()), state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = get(app, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_home() {
    let (app, _) = setup_test_app().await;

    let (status, body) = get(app, "/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"Welcome to NURD.");
}

#[tokio::test]
async fn test_all_jobs_returns_every_row() {
    let (app, _) = setup_test_app().await;

    let (status, json) = get_json(app, "/v1/jobs").await;

    assert_eq!(status, StatusCode::OK);
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0]["cluster"], "east");
    assert_eq!(rows[0]["job_id"], "web");
    assert!(rows[1]["degraded"].as_bool().unwrap());
}

#[tokio::test]
async fn test_job_latest_aggregate() {
    let (app, _) = setup_test_app().await;

    let (status, json) = get_json(app, "/v1/job/web").await;

    assert_eq!(status, StatusCode::OK);
    let aggregates = json.as_array().unwrap();
    assert_eq!(aggregates.len(), 1);
    assert_eq!(aggregates[0]["used_cpu_ticks"], 20.0);
    assert_eq!(aggregates[0]["degraded"], false);
}

#[tokio::test]
async fn test_job_range_is_inclusive_and_newest_first() {
    let (app, _) = setup_test_app().await;

    let (status, json) = get_json(
        app,
        "/v1/job/web?begin=2024-03-01%2010:00:00&end=2024-03-01%2010:15:00",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let aggregates = json.as_array().unwrap();
    assert_eq!(aggregates.len(), 2);
    assert_eq!(aggregates[0]["used_cpu_ticks"], 20.0);
    // Two clusters summed at 10:00, one of them degraded
    assert_eq!(aggregates[1]["used_cpu_ticks"], 15.0);
    assert_eq!(aggregates[1]["requested_cpu"], 200.0);
    assert_eq!(aggregates[1]["degraded"], true);
}

#[tokio::test]
async fn test_job_range_accepts_rfc3339() {
    let (app, _) = setup_test_app().await;

    let (status, json) = get_json(
        app,
        "/v1/job/web?begin=2024-03-01T10:10:00Z&end=2024-03-01T11:00:00Z",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_job_missing_begin() {
    let (app, _) = setup_test_app().await;

    let (status, json) = get_json(app, "/v1/job/web?end=2024-03-01%2010:15:00").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Missing query param: 'begin'");
}

#[tokio::test]
async fn test_job_missing_end() {
    let (app, _) = setup_test_app().await;

    let (status, json) = get_json(app, "/v1/job/web?begin=2024-03-01%2010:00:00").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Missing query param: 'end'");
}

#[tokio::test]
async fn test_job_invalid_timestamp() {
    let (app, _) = setup_test_app().await;

    let (status, json) = get_json(app, "/v1/job/web?begin=yesterday&end=today").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("begin"));
}

#[tokio::test]
async fn test_unknown_job_is_empty() {
    let (app, _) = setup_test_app().await;

    let (status, json) = get_json(app, "/v1/job/missing").await;

    assert_eq!(status, StatusCode::OK);
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_v1_health() {
    let (app, _) = setup_test_app().await;

    let (status, _) = get(app, "/v1/health").await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_healthz_healthy() {
    let (app, _) = setup_test_app().await;

    let (status, json) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_degraded_is_ok() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .set_degraded(components::STORE, "Insert failed")
        .await;

    let (status, json) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_unhealthy() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .set_unhealthy(components::POLLER, "All 2 clusters failed")
        .await;

    let (status, json) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_before_first_cycle() {
    let (app, _) = setup_test_app().await;

    let (status, json) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["ready"], false);
}

#[tokio::test]
async fn test_readyz_after_cycle() {
    let (app, state) = setup_test_app().await;
    state.health_registry.mark_cycle_completed().await;

    let (status, json) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, state) = setup_test_app().await;
    state.metrics.set_jobs(3, 1);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain; charset=utf-8"
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("nurd_jobs_polled"));
    assert!(text.contains("nurd_degraded_jobs"));
}

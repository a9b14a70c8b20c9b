//! Read-only query API plus health and Prometheus endpoints

use crate::error::StoreError;
use crate::health::{ComponentStatus, HealthRegistry};
use crate::observability::PollerMetrics;
use crate::store::{parse_timestamp, SnapshotStore};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SnapshotStore>,
    pub health_registry: HealthRegistry,
    pub metrics: PollerMetrics,
}

impl AppState {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        health_registry: HealthRegistry,
        metrics: PollerMetrics,
    ) -> Self {
        Self {
            store,
            health_registry,
            metrics,
        }
    }
}

/// Error body `{"error": "..."}` with a status code
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Store(e) => {
                error!(error = %e, "Snapshot store query failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Error querying snapshot store: {e}"),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

async fn home() -> &'static str {
    "Welcome to NURD."
}

async fn all_jobs(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let rows = state.store.all_rows().await?;
    Ok(Json(rows))
}

async fn job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    match (params.get("begin"), params.get("end")) {
        (None, None) => Ok(Json(state.store.latest_for_job(&job_id).await?)),
        (None, Some(_)) => Err(ApiError::BadRequest(
            "Missing query param: 'begin'".to_string(),
        )),
        (Some(_), None) => Err(ApiError::BadRequest(
            "Missing query param: 'end'".to_string(),
        )),
        (Some(begin), Some(end)) => {
            let begin = parse_param("begin", begin)?;
            let end = parse_param("end", end)?;
            Ok(Json(state.store.range_for_job(&job_id, begin, end).await?))
        }
    }
}

fn parse_param(name: &str, value: &str) -> Result<chrono::DateTime<chrono::Utc>, ApiError> {
    parse_timestamp(value).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "Invalid query param '{name}': expected 'YYYY-MM-DD HH:MM:SS' or RFC 3339, got {value:?}"
        ))
    })
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

/// Returns 200 while operational (healthy or degraded), 503 when unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/v1/jobs", get(all_jobs))
        .route("/v1/job/:id", get(job))
        .route("/v1/health", get(health_check))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the API until `shutdown` resolves
pub async fn serve<F>(port: u16, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

//! NURD - Nomad usage and resource digest
//!
//! Polls every configured Nomad cluster on a fixed interval, reconciles job
//! usage between VictoriaMetrics and Nomad allocation stats, persists one
//! snapshot per job and serves the history over HTTP.

use anyhow::{Context, Result};
use nurd_lib::{
    api::{self, AppState},
    client::http_client,
    health::{components, HealthRegistry},
    observability::{PollerMetrics, StructuredLogger},
    poller::{
        effective_interval, ClusterPoller, ClusterSetHandle, HttpConnector, PollerConfig,
        PollingLoopBuilder,
    },
    store::{MemorySnapshotStore, SnapshotStore, SqliteSnapshotStore},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const NURD_VERSION: &str = env!("CARGO_PKG_VERSION");

const STORE_CONNECT_ATTEMPTS: u32 = 5;
const STORE_CONNECT_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting nurd");

    let config = config::ServiceConfig::load()?;
    let clusters = config::load_cluster_file(&config.cluster_file)?;
    let interval = effective_interval(config.aggregate_frequency_secs);
    info!(
        cluster_file = %config.cluster_file.display(),
        clusters = clusters.len(),
        api_port = config.api_port,
        "Service configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::POLLER).await;
    health_registry.register(components::STORE).await;
    health_registry.register(components::CONFIG).await;

    let metrics = PollerMetrics::new();
    metrics.set_clusters(clusters.len() as i64, 0);

    let logger = StructuredLogger::new("nurd");
    logger.log_startup(NURD_VERSION, clusters.len(), interval.as_secs());

    let store = open_store(&config.database_url).await?;

    let http = http_client(Duration::from_secs(config.request_timeout_secs))?;
    let poller = ClusterPoller::new(
        Arc::new(HttpConnector::new(http)),
        PollerConfig {
            max_concurrent_jobs: config.max_concurrent_jobs,
            fallback_concurrency: config.fallback_concurrency,
        },
    );

    let cluster_handle = ClusterSetHandle::new(clusters);
    let polling_loop = PollingLoopBuilder::new()
        .poller(poller)
        .clusters(cluster_handle.clone())
        .store(store.clone())
        .health(health_registry.clone())
        .interval(interval)
        .build()?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let loop_handle = tokio::spawn(polling_loop.run(shutdown_tx.subscribe()));

    let reload_handle = tokio::spawn(reload_on_hangup(
        config.cluster_file.clone(),
        cluster_handle,
        health_registry.clone(),
        metrics.clone(),
        logger.clone(),
        shutdown_tx.subscribe(),
    ));

    let app_state = Arc::new(AppState::new(store, health_registry, metrics));
    let mut api_shutdown = shutdown_tx.subscribe();
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, async move {
        let _ = api_shutdown.recv().await;
    }));

    let reason = shutdown_signal().await?;
    logger.log_shutdown(reason);
    info!("Shutting down");

    // Receivers may already be gone if a task ended early
    let _ = shutdown_tx.send(());

    if let Err(e) = loop_handle.await {
        error!(error = %e, "Polling loop task failed");
    }
    match reload_handle.await {
        Ok(Err(e)) => warn!(error = %e, "Config reload task ended with an error"),
        Err(e) => error!(error = %e, "Config reload task failed"),
        Ok(Ok(())) => {}
    }
    match api_handle.await {
        Ok(result) => result.context("API server failed")?,
        Err(e) => error!(error = %e, "API server task failed"),
    }

    Ok(())
}

async fn open_store(database_url: &str) -> Result<Arc<dyn SnapshotStore>> {
    if database_url == config::MEMORY_STORE {
        warn!("Using the in-memory snapshot store, history is lost on restart");
        return Ok(Arc::new(MemorySnapshotStore::new()));
    }

    let store = SqliteSnapshotStore::connect_with_retry(
        database_url,
        STORE_CONNECT_ATTEMPTS,
        STORE_CONNECT_DELAY,
    )
    .await
    .with_context(|| format!("Failed to open snapshot store at {database_url}"))?;

    info!(database_url = %database_url, "Snapshot store opened");
    Ok(Arc::new(store))
}

/// Swap in a freshly parsed cluster file on every SIGHUP.
///
/// A failed reload keeps the current cluster set.
async fn reload_on_hangup(
    cluster_file: PathBuf,
    clusters: ClusterSetHandle,
    health: HealthRegistry,
    metrics: PollerMetrics,
    logger: StructuredLogger,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    loop {
        tokio::select! {
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
            }
            _ = shutdown.recv() => break,
        }

        match config::load_cluster_file(&cluster_file) {
            Ok(set) => {
                let count = set.len();
                clusters.replace(set).await;
                metrics.inc_config_reloads();
                logger.log_config_reload(count, true, None);
                health.set_healthy(components::CONFIG).await;
            }
            Err(e) => {
                let message = format!("{e:#}");
                let current = clusters.current().await.len();
                logger.log_config_reload(current, false, Some(&message));
                health
                    .set_degraded(components::CONFIG, format!("Reload failed: {message}"))
                    .await;
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() -> Result<&'static str> {
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for SIGINT")?;
            Ok("SIGINT received")
        }
        _ = terminate.recv() => Ok("SIGTERM received"),
    }
}

//! Periodic polling loop
//!
//! Runs one cycle per interval against the current cluster set, persists the
//! snapshots and publishes health and metrics. Cycles never overlap: a cycle
//! is bounded by a soft deadline equal to the interval and missed ticks are
//! skipped.

use super::{ClusterPoller, ClusterSetHandle, ClusterStatus, CycleReport};
use crate::health::{components, HealthRegistry};
use crate::observability::{PollerMetrics, StructuredLogger};
use crate::store::{truncate_to_minute, SnapshotStore};
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Interval used when none (or an out-of-range one) is configured
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(900);

/// Longest accepted interval
pub const MAX_INTERVAL: Duration = Duration::from_secs(1800);

/// Validate a configured interval in seconds, falling back to the default
pub fn effective_interval(secs: u64) -> Duration {
    let requested = Duration::from_secs(secs);
    if secs == 0 || requested > MAX_INTERVAL {
        warn!(
            requested_secs = secs,
            default_secs = DEFAULT_INTERVAL.as_secs(),
            "Aggregate frequency out of range (0, 1800], using default"
        );
        DEFAULT_INTERVAL
    } else {
        requested
    }
}

pub struct PollingLoop {
    poller: ClusterPoller,
    clusters: ClusterSetHandle,
    store: Arc<dyn SnapshotStore>,
    health: HealthRegistry,
    metrics: PollerMetrics,
    logger: StructuredLogger,
    interval: Duration,
}

impl PollingLoop {
    pub fn new(
        poller: ClusterPoller,
        clusters: ClusterSetHandle,
        store: Arc<dyn SnapshotStore>,
        health: HealthRegistry,
        interval: Duration,
    ) -> Self {
        Self {
            poller,
            clusters,
            store,
            health,
            metrics: PollerMetrics::new(),
            logger: StructuredLogger::new("nurd"),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run until a shutdown signal arrives. A cycle in progress at shutdown
    /// is abandoned.
    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting polling loop"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => {
                    info!("Shutting down polling loop");
                    break;
                }
            }

            tokio::select! {
                _ = self.run_cycle() => {}
                _ = shutdown.recv() => {
                    info!("Shutting down polling loop, abandoning running cycle");
                    break;
                }
            }
        }
    }

    /// Poll, persist and publish one cycle
    pub async fn run_cycle(&self) -> CycleReport {
        let clusters = self.clusters.current().await;
        let start = Instant::now();

        let report = self.poller.poll_all(&clusters, self.interval).await;
        let elapsed = start.elapsed();

        self.publish(&report, elapsed).await;
        self.persist(&report).await;
        self.health.mark_cycle_completed().await;

        report
    }

    async fn publish(&self, report: &CycleReport, elapsed: Duration) {
        let failed = report.failed_clusters();
        let degraded = report.degraded_snapshots();

        self.metrics.observe_cycle_duration(elapsed.as_secs_f64());
        self.metrics
            .set_clusters(report.clusters.len() as i64, failed as i64);
        self.metrics
            .set_jobs(report.snapshots.len() as i64, degraded as i64);

        for outcome in &report.clusters {
            for issue in outcome.all_issues() {
                self.metrics.inc_fetch_errors(issue.stage.as_str());
            }

            if outcome.status.is_failure() {
                let reason = match &outcome.status {
                    ClusterStatus::Unreachable(reason) => reason.as_str(),
                    _ => "timed out",
                };
                self.logger
                    .log_cluster_unreachable(&outcome.cluster, &outcome.address, reason);
            }

            for (job_id, issues) in &outcome.degraded_jobs {
                self.logger
                    .log_job_degraded(&outcome.cluster, job_id, issues.len());
            }
        }

        self.logger.log_cycle_completed(
            report.clusters.len(),
            failed,
            report.snapshots.len(),
            degraded,
            elapsed.as_millis(),
        );

        if report.clusters.is_empty() {
            self.health
                .set_degraded(components::POLLER, "No clusters configured")
                .await;
        } else if report.all_clusters_failed() {
            self.health
                .set_unhealthy(
                    components::POLLER,
                    format!("All {} clusters failed", report.clusters.len()),
                )
                .await;
        } else if failed > 0 || degraded > 0 {
            self.health
                .set_degraded(
                    components::POLLER,
                    format!(
                        "{} of {} clusters failed, {} degraded jobs",
                        failed,
                        report.clusters.len(),
                        degraded
                    ),
                )
                .await;
        } else {
            self.health.set_healthy(components::POLLER).await;
        }
    }

    async fn persist(&self, report: &CycleReport) {
        if report.snapshots.is_empty() {
            return;
        }

        let inserted_at = truncate_to_minute(Utc::now());
        match self
            .store
            .insert_batch(&report.snapshots, inserted_at)
            .await
        {
            Ok(written) => {
                self.metrics.add_snapshots_inserted(written as u64);
                self.health.set_healthy(components::STORE).await;
            }
            Err(e) => {
                error!(
                    error = %e,
                    snapshots = report.snapshots.len(),
                    "Failed to persist cycle snapshots"
                );
                self.metrics.inc_store_errors();
                self.health
                    .set_degraded(components::STORE, format!("Insert failed: {e}"))
                    .await;
            }
        }
    }
}

/// Builder for the polling loop
pub struct PollingLoopBuilder {
    poller: Option<ClusterPoller>,
    clusters: Option<ClusterSetHandle>,
    store: Option<Arc<dyn SnapshotStore>>,
    health: HealthRegistry,
    interval: Duration,
}

impl PollingLoopBuilder {
    pub fn new() -> Self {
        Self {
            poller: None,
            clusters: None,
            store: None,
            health: HealthRegistry::new(),
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn poller(mut self, poller: ClusterPoller) -> Self {
        self.poller = Some(poller);
        self
    }

    pub fn clusters(mut self, clusters: ClusterSetHandle) -> Self {
        self.clusters = Some(clusters);
        self
    }

    pub fn store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn build(self) -> Result<PollingLoop> {
        let poller = self
            .poller
            .ok_or_else(|| anyhow::anyhow!("Poller is required"))?;
        let clusters = self
            .clusters
            .ok_or_else(|| anyhow::anyhow!("Cluster set is required"))?;
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Snapshot store is required"))?;

        Ok(PollingLoop::new(
            poller,
            clusters,
            store,
            self.health,
            self.interval,
        ))
    }
}

impl Default for PollingLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

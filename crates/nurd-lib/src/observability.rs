//! Observability for the usage digest service
//!
//! Provides:
//! - Prometheus metrics (cycle duration, cluster reachability, job counts, store errors)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Buckets for polling cycle duration (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 900.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PollerMetricsInner> = OnceLock::new();

struct PollerMetricsInner {
    cycle_duration_seconds: Histogram,
    clusters_configured: IntGauge,
    clusters_unreachable: IntGauge,
    jobs_polled: IntGauge,
    degraded_jobs: IntGauge,
    snapshots_inserted: IntCounter,
    fetch_errors: IntCounterVec,
    store_errors: IntCounter,
    config_reloads: IntCounter,
}

impl PollerMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram!(
                "nurd_cycle_duration_seconds",
                "Wall time of one polling cycle across all clusters",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            clusters_configured: register_int_gauge!(
                "nurd_clusters_configured",
                "Cluster addresses polled in the last cycle"
            )
            .expect("Failed to register clusters_configured"),

            clusters_unreachable: register_int_gauge!(
                "nurd_clusters_unreachable",
                "Clusters that failed or timed out in the last cycle"
            )
            .expect("Failed to register clusters_unreachable"),

            jobs_polled: register_int_gauge!(
                "nurd_jobs_polled",
                "Jobs sampled in the last cycle"
            )
            .expect("Failed to register jobs_polled"),

            degraded_jobs: register_int_gauge!(
                "nurd_degraded_jobs",
                "Jobs whose snapshot was degraded in the last cycle"
            )
            .expect("Failed to register degraded_jobs"),

            snapshots_inserted: register_int_counter!(
                "nurd_snapshots_inserted_total",
                "Total number of snapshots written to the store"
            )
            .expect("Failed to register snapshots_inserted"),

            fetch_errors: register_int_counter_vec!(
                "nurd_fetch_errors_total",
                "Total number of failed remote fetches by stage",
                &["stage"]
            )
            .expect("Failed to register fetch_errors"),

            store_errors: register_int_counter!(
                "nurd_store_errors_total",
                "Total number of failed snapshot inserts"
            )
            .expect("Failed to register store_errors"),

            config_reloads: register_int_counter!(
                "nurd_config_reloads_total",
                "Total number of successful cluster file reloads"
            )
            .expect("Failed to register config_reloads"),
        }
    }
}

/// Handle to the process-wide poller metrics.
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct PollerMetrics {
    inner: &'static PollerMetricsInner,
}

impl Default for PollerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PollerMetrics {
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(PollerMetricsInner::new),
        }
    }

    pub fn observe_cycle_duration(&self, duration_secs: f64) {
        self.inner.cycle_duration_seconds.observe(duration_secs);
    }

    pub fn set_clusters(&self, configured: i64, unreachable: i64) {
        self.inner.clusters_configured.set(configured);
        self.inner.clusters_unreachable.set(unreachable);
    }

    pub fn set_jobs(&self, polled: i64, degraded: i64) {
        self.inner.jobs_polled.set(polled);
        self.inner.degraded_jobs.set(degraded);
    }

    pub fn add_snapshots_inserted(&self, count: u64) {
        self.inner.snapshots_inserted.inc_by(count);
    }

    pub fn inc_fetch_errors(&self, stage: &str) {
        self.inner.fetch_errors.with_label_values(&[stage]).inc();
    }

    pub fn inc_store_errors(&self) {
        self.inner.store_errors.inc();
    }

    pub fn inc_config_reloads(&self) {
        self.inner.config_reloads.inc();
    }
}

/// Structured logger for service events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, clusters: usize, interval_secs: u64) {
        info!(
            event = "service_started",
            instance = %self.instance,
            version = %version,
            clusters = clusters,
            interval_secs = interval_secs,
            "NURD started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            instance = %self.instance,
            reason = %reason,
            "NURD shutting down"
        );
    }

    pub fn log_cycle_completed(
        &self,
        clusters: usize,
        unreachable: usize,
        jobs: usize,
        degraded_jobs: usize,
        elapsed_ms: u128,
    ) {
        info!(
            event = "cycle_completed",
            instance = %self.instance,
            clusters = clusters,
            unreachable = unreachable,
            jobs = jobs,
            degraded_jobs = degraded_jobs,
            elapsed_ms = elapsed_ms,
            "Polling cycle complete"
        );
    }

    pub fn log_cluster_unreachable(&self, cluster: &str, address: &str, reason: &str) {
        warn!(
            event = "cluster_unreachable",
            instance = %self.instance,
            cluster = %cluster,
            address = %address,
            reason = %reason,
            "Cluster skipped for this cycle"
        );
    }

    pub fn log_job_degraded(&self, cluster: &str, job_id: &str, issues: usize) {
        warn!(
            event = "job_degraded",
            instance = %self.instance,
            cluster = %cluster,
            job_id = %job_id,
            issues = issues,
            "Job snapshot recorded with degraded values"
        );
    }

    pub fn log_config_reload(&self, clusters: usize, success: bool, error: Option<&str>) {
        if success {
            info!(
                event = "config_reload",
                instance = %self.instance,
                clusters = clusters,
                "Cluster file reloaded"
            );
        } else {
            warn!(
                event = "config_reload_failed",
                instance = %self.instance,
                error = ?error,
                "Cluster file reload failed, keeping previous clusters"
            );
        }
    }
}

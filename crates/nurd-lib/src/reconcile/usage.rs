//! Per-kind view of what the metrics store reports for a job

use crate::client::MetricsApi;
use crate::error::{FetchIssue, FetchStage};
use crate::models::MetricKind;
use std::collections::HashSet;

/// Store subtotal and coverage for one kind.
///
/// A view is only trusted when both the aggregate and the coverage query
/// succeeded. An untrusted view reports nothing, which turns every
/// orchestrator allocation into a gap for that kind.
#[derive(Debug, Clone)]
pub struct StoreView {
    pub kind: MetricKind,
    /// Already converted to the reported unit
    pub subtotal: f64,
    pub covered: HashSet<String>,
    pub trusted: bool,
}

impl StoreView {
    fn untrusted(kind: MetricKind) -> Self {
        Self {
            kind,
            subtotal: 0.0,
            covered: HashSet::new(),
            trusted: false,
        }
    }
}

/// Run the aggregate and coverage queries for one kind concurrently
pub async fn fetch_store_view(
    metrics: &dyn MetricsApi,
    kind: MetricKind,
    job_name: &str,
) -> (StoreView, Vec<FetchIssue>) {
    let (sum, coverage) = tokio::join!(
        metrics.job_sum(kind, job_name),
        metrics.covered_allocations(kind, job_name)
    );

    let mut issues = Vec::new();

    let subtotal = match sum {
        Ok(value) => Some(value.map(|raw| kind.to_reported(raw)).unwrap_or(0.0)),
        Err(e) => {
            tracing::warn!(job = %job_name, kind = %kind, error = %e, "Metric sum query failed");
            issues.push(FetchIssue::new(FetchStage::MetricSum, job_name, &e).for_kind(kind));
            None
        }
    };

    let covered = match coverage {
        Ok(ids) => Some(ids),
        Err(e) => {
            tracing::warn!(job = %job_name, kind = %kind, error = %e, "Metric coverage query failed");
            issues.push(FetchIssue::new(FetchStage::MetricCoverage, job_name, &e).for_kind(kind));
            None
        }
    };

    let view = match (subtotal, covered) {
        (Some(subtotal), Some(covered)) => StoreView {
            kind,
            subtotal,
            covered,
            trusted: true,
        },
        _ => StoreView::untrusted(kind),
    };

    (view, issues)
}

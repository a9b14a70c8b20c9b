//! Usage reconciliation
//!
//! The metrics store is the primary source of per-allocation usage, but it
//! routinely misses allocations (scrape lag, freshly placed allocations,
//! dropped series). For every metric kind the reconciler takes the store's
//! job-wide subtotal, works out which of the orchestrator's allocations the
//! store does not cover, and fills exactly those from Nomad's per-allocation
//! stats endpoint. Each allocation contributes to a kind's total at most once.

mod gap;
mod usage;


pub use gap::GapSet;
pub use usage::{fetch_store_view, StoreView};

use crate::client::{AllocationStats, MetricsApi, OrchestratorApi};
use crate::error::{FetchError, FetchIssue, FetchStage};
use crate::models::{MetricKind, UsageTotals};
use futures::stream::{self, StreamExt};
use std::sync::Arc;

/// Default bound on concurrent allocation-stats fetches per job
pub const DEFAULT_FALLBACK_CONCURRENCY: usize = 8;

/// Result of reconciling one job
#[derive(Debug, Clone, Default)]
pub struct UsageReport {
    pub totals: UsageTotals,
    pub gaps: GapSet,
    pub issues: Vec<FetchIssue>,
}

impl UsageReport {
    pub fn is_degraded(&self) -> bool {
        !self.issues.is_empty()
    }
}

/// Combines metrics-store figures with Nomad allocation stats for one cluster
#[derive(Clone)]
pub struct UsageReconciler {
    orchestrator: Arc<dyn OrchestratorApi>,
    metrics: Arc<dyn MetricsApi>,
    fallback_concurrency: usize,
}

impl UsageReconciler {
    pub fn new(orchestrator: Arc<dyn OrchestratorApi>, metrics: Arc<dyn MetricsApi>) -> Self {
        Self {
            orchestrator,
            metrics,
            fallback_concurrency: DEFAULT_FALLBACK_CONCURRENCY,
        }
    }

    pub fn with_fallback_concurrency(mut self, limit: usize) -> Self {
        self.fallback_concurrency = limit.max(1);
        self
    }

    /// Reconcile all usage kinds for one job.
    ///
    /// Never fails: every fetch failure lands in `UsageReport::issues` and the
    /// affected value degrades to zero.
    pub async fn reconcile(&self, job_id: &str, job_name: &str) -> UsageReport {
        let metrics = self.metrics.as_ref();

        let (views, allocations) = tokio::join!(
            futures::future::join_all(
                MetricKind::ALL.map(|kind| fetch_store_view(metrics, kind, job_name))
            ),
            self.orchestrator.job_allocations(job_id)
        );

        let mut report = UsageReport::default();
        let mut store_views = Vec::with_capacity(views.len());
        for (view, issues) in views {
            report.totals.add(view.kind, view.subtotal);
            report.issues.extend(issues);
            store_views.push(view);
        }

        let allocations = match allocations {
            Ok(allocations) => allocations,
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    error = %e,
                    "Failed to list allocations, keeping metrics-store subtotals"
                );
                report
                    .issues
                    .push(FetchIssue::new(FetchStage::Allocations, job_id, &e));
                return report;
            }
        };

        let alloc_ids: Vec<String> = allocations.into_iter().map(|a| a.id).collect();
        for view in &store_views {
            report.gaps.record(view.kind, &alloc_ids, &view.covered);
        }

        if report.gaps.is_empty() {
            return report;
        }

        tracing::debug!(
            job_id = %job_id,
            allocations = alloc_ids.len(),
            gaps = report.gaps.len(),
            "Filling metrics-store gaps from allocation stats"
        );

        let fetched = self.fetch_gap_stats(&report.gaps).await;

        // `fetched` is in allocation-id order, so the sum is independent of
        // response arrival order.
        for (alloc_id, result) in fetched {
            match result {
                Ok(stats) => {
                    if let Some(kinds) = report.gaps.kinds_for(&alloc_id) {
                        for kind in kinds {
                            if let Some(raw) = stats.raw(*kind) {
                                report.totals.add(*kind, kind.to_reported(raw));
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job_id,
                        alloc_id = %alloc_id,
                        error = %e,
                        "Allocation stats fetch failed, skipping allocation"
                    );
                    report
                        .issues
                        .push(FetchIssue::new(FetchStage::AllocationStats, alloc_id, &e));
                }
            }
        }

        report
    }

    /// One stats request per gap allocation, results kept in gap order
    async fn fetch_gap_stats(
        &self,
        gaps: &GapSet,
    ) -> Vec<(String, Result<AllocationStats, FetchError>)> {
        let orchestrator = self.orchestrator.as_ref();
        let alloc_ids: Vec<String> = gaps
            .iter()
            .map(|(alloc_id, _)| alloc_id.clone())
            .collect();

        stream::iter(alloc_ids)
            .map(|alloc_id| async move {
                let result = orchestrator.allocation_stats(&alloc_id).await;
                (alloc_id, result)
            })
            .buffered(self.fallback_concurrency)
            .collect()
            .await
    }
}

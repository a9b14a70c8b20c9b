//! One polling cycle across every configured cluster

use super::{ClusterConnector, ClusterSet};
use crate::error::{FetchIssue, FetchStage};
use crate::models::{ClusterAddress, JobDescriptor, JobUsageSnapshot};
use crate::reconcile::{UsageReconciler, DEFAULT_FALLBACK_CONCURRENCY};
use crate::requested::RequestedCalculator;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Concurrency bounds for one cycle
#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    /// Jobs processed at once within one cluster
    pub max_concurrent_jobs: usize,
    /// Allocation-stats fetches at once within one job
    pub fallback_concurrency: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 16,
            fallback_concurrency: DEFAULT_FALLBACK_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterStatus {
    Completed,
    /// The connection could not be built or the job list failed
    Unreachable(String),
    /// Cancelled at the cycle's soft deadline
    TimedOut,
}

impl ClusterStatus {
    pub fn is_failure(&self) -> bool {
        !matches!(self, ClusterStatus::Completed)
    }
}

/// What happened to one cluster address during a cycle
#[derive(Debug, Clone)]
pub struct ClusterOutcome {
    pub cluster: String,
    /// Orchestrator URL of the address
    pub address: String,
    pub status: ClusterStatus,
    pub jobs_polled: usize,
    pub jobs_skipped: usize,
    /// Job id -> issues that degraded its snapshot
    pub degraded_jobs: BTreeMap<String, Vec<FetchIssue>>,
    /// Issues not tied to one job
    pub issues: Vec<FetchIssue>,
}

impl ClusterOutcome {
    fn new(address: &ClusterAddress, status: ClusterStatus) -> Self {
        Self {
            cluster: address.name.clone(),
            address: address.orchestrator_url.clone(),
            status,
            jobs_polled: 0,
            jobs_skipped: 0,
            degraded_jobs: BTreeMap::new(),
            issues: Vec::new(),
        }
    }

    pub fn all_issues(&self) -> impl Iterator<Item = &FetchIssue> {
        self.issues
            .iter()
            .chain(self.degraded_jobs.values().flatten())
    }
}

/// Everything one cycle produced
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub sample_time: DateTime<Utc>,
    /// Deduplicated, in configuration order
    pub snapshots: Vec<JobUsageSnapshot>,
    /// One per address, in configuration order
    pub clusters: Vec<ClusterOutcome>,
}

impl CycleReport {
    pub fn failed_clusters(&self) -> usize {
        self.clusters
            .iter()
            .filter(|c| c.status.is_failure())
            .count()
    }

    pub fn all_clusters_failed(&self) -> bool {
        !self.clusters.is_empty() && self.failed_clusters() == self.clusters.len()
    }

    pub fn degraded_snapshots(&self) -> usize {
        self.snapshots.iter().filter(|s| s.degraded).count()
    }
}

/// Fans a cycle out over every cluster address
#[derive(Clone)]
pub struct ClusterPoller {
    connector: Arc<dyn ClusterConnector>,
    config: PollerConfig,
}

impl ClusterPoller {
    pub fn new(connector: Arc<dyn ClusterConnector>, config: PollerConfig) -> Self {
        Self { connector, config }
    }

    /// Poll every cluster concurrently; a cluster still running at `deadline`
    /// is cancelled and reported as timed out.
    pub async fn poll_all(&self, clusters: &ClusterSet, deadline: Duration) -> CycleReport {
        let sample_time = Utc::now();
        let addresses = clusters.addresses();

        let mut tasks = JoinSet::new();
        for (index, address) in addresses.iter().cloned().enumerate() {
            let poller = self.clone();
            tasks.spawn(async move {
                let polled =
                    tokio::time::timeout(deadline, poller.poll_cluster(&address, sample_time))
                        .await;
                (index, polled)
            });
        }

        let mut slots: Vec<Option<(Vec<JobUsageSnapshot>, ClusterOutcome)>> =
            (0..addresses.len()).map(|_| None).collect();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(polled))) => slots[index] = Some(polled),
                Ok((index, Err(_elapsed))) => {
                    let address = &addresses[index];
                    warn!(
                        cluster = %address.name,
                        address = %address.orchestrator_url,
                        deadline_secs = deadline.as_secs(),
                        "Cluster poll exceeded the cycle deadline"
                    );
                    slots[index] = Some((
                        Vec::new(),
                        ClusterOutcome::new(address, ClusterStatus::TimedOut),
                    ));
                }
                Err(e) => error!(error = %e, "Cluster poll task failed"),
            }
        }

        let mut snapshots = Vec::new();
        let mut outcomes = Vec::with_capacity(addresses.len());
        for (slot, address) in slots.into_iter().zip(addresses) {
            let (cluster_snapshots, outcome) = slot.unwrap_or_else(|| {
                (
                    Vec::new(),
                    ClusterOutcome::new(
                        address,
                        ClusterStatus::Unreachable("poll task aborted".to_string()),
                    ),
                )
            });
            snapshots.extend(cluster_snapshots);
            outcomes.push(outcome);
        }

        CycleReport {
            sample_time,
            snapshots: dedupe_snapshots(snapshots),
            clusters: outcomes,
        }
    }

    async fn poll_cluster(
        &self,
        address: &ClusterAddress,
        sample_time: DateTime<Utc>,
    ) -> (Vec<JobUsageSnapshot>, ClusterOutcome) {
        let clients = match self.connector.connect(address) {
            Ok(clients) => clients,
            Err(e) => {
                let outcome =
                    ClusterOutcome::new(address, ClusterStatus::Unreachable(e.to_string()));
                return (Vec::new(), outcome);
            }
        };

        let entries = match clients.orchestrator.list_jobs().await {
            Ok(entries) => entries,
            Err(e) => {
                let mut outcome =
                    ClusterOutcome::new(address, ClusterStatus::Unreachable(e.to_string()));
                outcome.issues.push(FetchIssue::new(
                    FetchStage::JobList,
                    address.orchestrator_url.as_str(),
                    &e,
                ));
                return (Vec::new(), outcome);
            }
        };

        let mut outcome = ClusterOutcome::new(address, ClusterStatus::Completed);

        let jobs: Vec<JobDescriptor> = entries.iter().filter_map(|e| e.descriptor()).collect();
        outcome.jobs_skipped = entries.len() - jobs.len();
        outcome.jobs_polled = jobs.len();

        debug!(
            cluster = %address.name,
            jobs = jobs.len(),
            skipped = outcome.jobs_skipped,
            "Polling cluster jobs"
        );

        let reconciler = UsageReconciler::new(clients.orchestrator.clone(), clients.metrics)
            .with_fallback_concurrency(self.config.fallback_concurrency);
        let calculator = RequestedCalculator::new(clients.orchestrator);
        let reconciler = &reconciler;
        let calculator = &calculator;

        let results: Vec<_> = stream::iter(jobs)
            .map(|job| async move {
                let (usage, requested) = tokio::join!(
                    reconciler.reconcile(&job.job_id, &job.name),
                    calculator.compute(&job.job_id, job.scheduling_type)
                );
                (job, usage, requested)
            })
            .buffered(self.config.max_concurrent_jobs.max(1))
            .collect()
            .await;

        let mut snapshots = Vec::with_capacity(results.len());
        for (job, usage, requested) in results {
            let mut issues = usage.issues;
            issues.extend(requested.issues);
            let degraded = !issues.is_empty();

            snapshots.push(JobUsageSnapshot::new(
                &address.name,
                &job,
                usage.totals,
                requested.requested,
                degraded,
                sample_time,
            ));

            if degraded {
                outcome.degraded_jobs.insert(job.job_id, issues);
            }
        }

        (snapshots, outcome)
    }
}

/// Keep one snapshot per (cluster name, job id).
///
/// Addresses sharing a cluster name are redundant endpoints of the same
/// cluster. The first non-degraded snapshot wins, otherwise the first one;
/// the survivor keeps the position of the first occurrence.
pub fn dedupe_snapshots(snapshots: Vec<JobUsageSnapshot>) -> Vec<JobUsageSnapshot> {
    let mut kept: Vec<JobUsageSnapshot> = Vec::with_capacity(snapshots.len());
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for snapshot in snapshots {
        let key = (snapshot.cluster.clone(), snapshot.job_id.clone());
        match index.get(&key) {
            Some(&position) => {
                if kept[position].degraded && !snapshot.degraded {
                    kept[position] = snapshot;
                }
            }
            None => {
                index.insert(key, kept.len());
                kept.push(snapshot);
            }
        }
    }

    kept
}

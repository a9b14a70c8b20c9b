//! In-memory Nomad and metrics-store doubles shared by the unit tests

use crate::client::{
    AllocationStats, AllocationStub, CpuStats, EphemeralDisk, JobListEntry, JobSpec, MemoryStats,
    MetricsApi, OrchestratorApi, ResourceUsage, Task, TaskGroup, TaskResources,
};
use crate::error::FetchError;
use crate::models::MetricKind;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn server_error(url: &str) -> FetchError {
    FetchError::Status {
        url: url.to_string(),
        status: 500,
        body: "internal error".to_string(),
    }
}

pub fn not_found(url: &str) -> FetchError {
    FetchError::Status {
        url: url.to_string(),
        status: 404,
        body: "not found".to_string(),
    }
}

pub fn job_entry(id: &str, job_type: &str) -> JobListEntry {
    JobListEntry {
        id: id.to_string(),
        name: id.to_string(),
        datacenters: vec!["dc1".to_string()],
        job_type: job_type.to_string(),
        namespace: Some("default".to_string()),
        job_summary: None,
    }
}

pub fn alloc(id: &str, group: &str, status: Option<&str>) -> AllocationStub {
    AllocationStub {
        id: id.to_string(),
        task_group: group.to_string(),
        client_status: status.map(String::from),
    }
}

pub fn stats(rss: f64, cache: f64, ticks: f64) -> AllocationStats {
    AllocationStats {
        resource_usage: Some(ResourceUsage {
            memory_stats: Some(MemoryStats {
                rss,
                cache,
                ..Default::default()
            }),
            cpu_stats: Some(CpuStats {
                total_ticks: ticks,
                ..Default::default()
            }),
        }),
    }
}

pub fn task(cpu: f64, memory_mb: f64, iops: f64) -> Task {
    Task {
        resources: Some(TaskResources {
            cpu,
            memory_mb,
            disk_mb: 0.0,
            iops,
        }),
    }
}

pub fn group(name: &str, count: f64, tasks: Vec<Task>, disk_mb: Option<f64>) -> TaskGroup {
    TaskGroup {
        name: name.to_string(),
        count,
        tasks,
        ephemeral_disk: disk_mb.map(|size_mb| EphemeralDisk { size_mb }),
    }
}

/// Scripted Nomad API
#[derive(Default)]
pub struct MockOrchestrator {
    pub jobs: Vec<JobListEntry>,
    pub fail_jobs: bool,
    pub list_delay: Option<Duration>,
    pub specs: HashMap<String, JobSpec>,
    pub failing_specs: HashSet<String>,
    pub allocations: HashMap<String, Vec<AllocationStub>>,
    pub failing_allocations: HashSet<String>,
    pub stats: HashMap<String, AllocationStats>,
    pub stats_delays: HashMap<String, Duration>,
    pub stats_calls: Mutex<Vec<String>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job(mut self, entry: JobListEntry) -> Self {
        self.jobs.push(entry);
        self
    }

    pub fn with_spec(mut self, job_id: &str, groups: Vec<TaskGroup>) -> Self {
        self.specs.insert(
            job_id.to_string(),
            JobSpec {
                task_groups: Some(groups),
            },
        );
        self
    }

    pub fn with_allocations(mut self, job_id: &str, allocs: Vec<AllocationStub>) -> Self {
        self.allocations.insert(job_id.to_string(), allocs);
        self
    }

    pub fn with_stats(mut self, alloc_id: &str, stats: AllocationStats) -> Self {
        self.stats.insert(alloc_id.to_string(), stats);
        self
    }

    pub fn with_stats_delay(mut self, alloc_id: &str, delay: Duration) -> Self {
        self.stats_delays.insert(alloc_id.to_string(), delay);
        self
    }

    pub fn stats_calls(&self) -> Vec<String> {
        let mut calls = self.stats_calls.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

#[async_trait]
impl OrchestratorApi for MockOrchestrator {
    async fn list_jobs(&self) -> Result<Vec<JobListEntry>, FetchError> {
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_jobs {
            return Err(server_error("/v1/jobs"));
        }
        Ok(self.jobs.clone())
    }

    async fn job_spec(&self, job_id: &str) -> Result<JobSpec, FetchError> {
        if self.failing_specs.contains(job_id) {
            return Err(server_error(job_id));
        }
        self.specs
            .get(job_id)
            .cloned()
            .ok_or_else(|| not_found(job_id))
    }

    async fn job_allocations(&self, job_id: &str) -> Result<Vec<AllocationStub>, FetchError> {
        if self.failing_allocations.contains(job_id) {
            return Err(server_error(job_id));
        }
        Ok(self.allocations.get(job_id).cloned().unwrap_or_default())
    }

    async fn allocation_stats(&self, alloc_id: &str) -> Result<AllocationStats, FetchError> {
        self.stats_calls.lock().unwrap().push(alloc_id.to_string());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.stats_delays.get(alloc_id) {
            tokio::time::sleep(*delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.stats
            .get(alloc_id)
            .cloned()
            .ok_or_else(|| server_error(alloc_id))
    }
}

/// Scripted metrics store keyed by (kind, job name)
#[derive(Default)]
pub struct MockMetrics {
    pub sums: HashMap<(MetricKind, String), f64>,
    pub coverage: HashMap<(MetricKind, String), HashSet<String>>,
    pub failing_sums: HashSet<MetricKind>,
    pub failing_coverage: HashSet<MetricKind>,
    pub unavailable: bool,
    pub calls: AtomicUsize,
}

impl MockMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sum(mut self, kind: MetricKind, job: &str, raw: f64) -> Self {
        self.sums.insert((kind, job.to_string()), raw);
        self
    }

    pub fn with_coverage(mut self, kind: MetricKind, job: &str, ids: &[&str]) -> Self {
        self.coverage.insert(
            (kind, job.to_string()),
            ids.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn failing_sum(mut self, kind: MetricKind) -> Self {
        self.failing_sums.insert(kind);
        self
    }

    pub fn failing_coverage(mut self, kind: MetricKind) -> Self {
        self.failing_coverage.insert(kind);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }
}

#[async_trait]
impl MetricsApi for MockMetrics {
    async fn job_sum(&self, kind: MetricKind, job_name: &str) -> Result<Option<f64>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable || self.failing_sums.contains(&kind) {
            return Err(server_error("/api/v1/query"));
        }
        Ok(self.sums.get(&(kind, job_name.to_string())).copied())
    }

    async fn covered_allocations(
        &self,
        kind: MetricKind,
        job_name: &str,
    ) -> Result<HashSet<String>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable || self.failing_coverage.contains(&kind) {
            return Err(server_error("/api/v1/query"));
        }
        Ok(self
            .coverage
            .get(&(kind, job_name.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

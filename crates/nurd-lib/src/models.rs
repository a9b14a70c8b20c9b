//! Core data models for usage digestion

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bytes per reported megabyte for memory and page cache.
pub const BYTES_PER_MEGABYTE: f64 = 1.049e6;

/// Namespace reported when Nomad omits one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// One Nomad cluster and the metrics store that scrapes it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAddress {
    /// Logical cluster identity; addresses sharing a name are redundant endpoints
    pub name: String,
    /// Base URL of the Nomad HTTP API (e.g. "http://nomad:4646")
    pub orchestrator_url: String,
    /// Base URL of the VictoriaMetrics/Prometheus query API
    pub metrics_url: String,
}

/// How Nomad places a job's task groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingType {
    /// Fixed declared count per task group (Nomad `service`)
    Replicated,
    /// One instance per eligible node (Nomad `system`)
    FleetWide,
}

impl SchedulingType {
    /// Map a Nomad job type; unschedulable kinds (batch, sysbatch, ...) are `None`
    pub fn from_job_type(job_type: &str) -> Option<Self> {
        match job_type {
            "service" => Some(Self::Replicated),
            "system" => Some(Self::FleetWide),
            _ => None,
        }
    }
}

/// A job as listed by the orchestrator for the current cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: String,
    pub name: String,
    pub scheduling_type: SchedulingType,
    pub datacenters: Vec<String>,
    pub namespace: String,
}

/// Usage metric kinds reconciled independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    CpuTicks,
    ResidentMemory,
    PageCache,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [
        MetricKind::CpuTicks,
        MetricKind::ResidentMemory,
        MetricKind::PageCache,
    ];

    /// Nomad client telemetry series carrying this kind
    pub fn series(&self) -> &'static str {
        match self {
            MetricKind::CpuTicks => "nomad_client_allocs_cpu_total_ticks_value",
            MetricKind::ResidentMemory => "nomad_client_allocs_memory_rss_value",
            MetricKind::PageCache => "nomad_client_allocs_memory_cache_value",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::CpuTicks => "cpu_ticks",
            MetricKind::ResidentMemory => "resident_memory",
            MetricKind::PageCache => "page_cache",
        }
    }

    /// Convert a raw sample into the reported unit.
    ///
    /// Ticks are cumulative counts and pass through; memory and cache are
    /// bytes and become megabytes.
    pub fn to_reported(&self, raw: f64) -> f64 {
        match self {
            MetricKind::CpuTicks => raw,
            MetricKind::ResidentMemory | MetricKind::PageCache => raw / BYTES_PER_MEGABYTE,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconciled usage totals for one job
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub cpu_ticks: f64,
    pub resident_memory_mb: f64,
    pub page_cache_mb: f64,
}

impl UsageTotals {
    pub fn get(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::CpuTicks => self.cpu_ticks,
            MetricKind::ResidentMemory => self.resident_memory_mb,
            MetricKind::PageCache => self.page_cache_mb,
        }
    }

    pub fn add(&mut self, kind: MetricKind, value: f64) {
        match kind {
            MetricKind::CpuTicks => self.cpu_ticks += value,
            MetricKind::ResidentMemory => self.resident_memory_mb += value,
            MetricKind::PageCache => self.page_cache_mb += value,
        }
    }
}

/// Resources a job's specification asks for
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestedResources {
    pub cpu: f64,
    pub memory_mb: f64,
    pub disk_mb: f64,
    pub iops: f64,
}

/// Per-job sample produced once per polling cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobUsageSnapshot {
    pub cluster: String,
    pub job_id: String,
    pub name: String,
    pub namespace: String,
    /// Comma-joined datacenter list
    pub datacenters: String,
    pub used_cpu_ticks: f64,
    pub used_resident_memory: f64,
    pub used_page_cache: f64,
    pub requested_cpu: f64,
    pub requested_memory_mb: f64,
    pub requested_disk_mb: f64,
    pub requested_iops: f64,
    /// True when any fetch for this job failed and a value fell back to zero
    pub degraded: bool,
    pub sample_time: DateTime<Utc>,
}

impl JobUsageSnapshot {
    pub fn new(
        cluster: &str,
        job: &JobDescriptor,
        usage: UsageTotals,
        requested: RequestedResources,
        degraded: bool,
        sample_time: DateTime<Utc>,
    ) -> Self {
        Self {
            cluster: cluster.to_string(),
            job_id: job.job_id.clone(),
            name: job.name.clone(),
            namespace: job.namespace.clone(),
            datacenters: job.datacenters.join(","),
            used_cpu_ticks: usage.cpu_ticks,
            used_resident_memory: usage.resident_memory_mb,
            used_page_cache: usage.page_cache_mb,
            requested_cpu: requested.cpu,
            requested_memory_mb: requested.memory_mb,
            requested_disk_mb: requested.disk_mb,
            requested_iops: requested.iops,
            degraded,
            sample_time,
        }
    }
}

/// A persisted snapshot row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    #[serde(flatten)]
    pub snapshot: JobUsageSnapshot,
    pub inserted_at: DateTime<Utc>,
}

/// Snapshots of one job summed per insertion instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobUsageAggregate {
    pub job_id: String,
    pub name: String,
    pub namespace: String,
    pub datacenters: String,
    pub used_cpu_ticks: f64,
    pub used_resident_memory: f64,
    pub used_page_cache: f64,
    pub requested_cpu: f64,
    pub requested_memory_mb: f64,
    pub requested_disk_mb: f64,
    pub requested_iops: f64,
    pub degraded: bool,
    pub inserted_at: DateTime<Utc>,
}

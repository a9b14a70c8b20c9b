//! Nomad HTTP API client
//!
//! Response structures mirror the subset of Nomad's JSON this crate reads.
//! Every field Nomad may omit is either defaulted or optional, so a sparse
//! response decodes instead of failing.

use super::{get_json, join_segments, parse_base, OrchestratorApi};
use crate::error::FetchError;
use crate::models::{JobDescriptor, MetricKind, SchedulingType, DEFAULT_NAMESPACE};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

/// Entry of `GET /v1/jobs`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobListEntry {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub datacenters: Vec<String>,
    #[serde(rename = "Type", default)]
    pub job_type: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub job_summary: Option<JobSummary>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobSummary {
    #[serde(default)]
    pub namespace: Option<String>,
}

impl JobListEntry {
    /// Convert into a descriptor, or `None` for job types that are not polled
    pub fn descriptor(&self) -> Option<JobDescriptor> {
        let scheduling_type = SchedulingType::from_job_type(&self.job_type)?;

        let namespace = self
            .namespace
            .clone()
            .or_else(|| self.job_summary.as_ref().and_then(|s| s.namespace.clone()))
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let name = if self.name.is_empty() {
            self.id.clone()
        } else {
            self.name.clone()
        };

        Some(JobDescriptor {
            job_id: self.id.clone(),
            name,
            scheduling_type,
            datacenters: self.datacenters.clone(),
            namespace,
        })
    }
}

/// Body of `GET /v1/job/<id>`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobSpec {
    #[serde(default)]
    pub task_groups: Option<Vec<TaskGroup>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskGroup {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub count: f64,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub ephemeral_disk: Option<EphemeralDisk>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Task {
    #[serde(default)]
    pub resources: Option<TaskResources>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TaskResources {
    #[serde(rename = "CPU", default)]
    pub cpu: f64,
    #[serde(rename = "MemoryMB", default)]
    pub memory_mb: f64,
    #[serde(rename = "DiskMB", default)]
    pub disk_mb: f64,
    #[serde(rename = "IOPS", default)]
    pub iops: f64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct EphemeralDisk {
    #[serde(rename = "SizeMB", default)]
    pub size_mb: f64,
}

/// Entry of `GET /v1/job/<id>/allocations`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AllocationStub {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub task_group: String,
    #[serde(default)]
    pub client_status: Option<String>,
}

impl AllocationStub {
    /// Pending or running; a missing status is treated as live
    pub fn is_live(&self) -> bool {
        match self.client_status.as_deref() {
            None => true,
            Some(status) => matches!(status, "pending" | "running"),
        }
    }
}

/// Body of `GET /v1/client/allocation/<id>/stats`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AllocationStats {
    #[serde(default)]
    pub resource_usage: Option<ResourceUsage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceUsage {
    #[serde(default)]
    pub memory_stats: Option<MemoryStats>,
    #[serde(default)]
    pub cpu_stats: Option<CpuStats>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MemoryStats {
    #[serde(rename = "RSS", default)]
    pub rss: f64,
    #[serde(default)]
    pub cache: f64,
    #[serde(default)]
    pub swap: f64,
    #[serde(default)]
    pub usage: f64,
    #[serde(default)]
    pub max_usage: f64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CpuStats {
    #[serde(default)]
    pub total_ticks: f64,
    #[serde(default)]
    pub user_mode: f64,
    #[serde(default)]
    pub system_mode: f64,
}

impl AllocationStats {
    /// Raw value for a kind; `None` when the allocation reported no usable
    /// (present and finite) usage for it
    pub fn raw(&self, kind: MetricKind) -> Option<f64> {
        let usage = self.resource_usage.as_ref()?;
        let value = match kind {
            MetricKind::CpuTicks => usage.cpu_stats.map(|c| c.total_ticks),
            MetricKind::ResidentMemory => usage.memory_stats.map(|m| m.rss),
            MetricKind::PageCache => usage.memory_stats.map(|m| m.cache),
        };
        value.filter(|v| v.is_finite())
    }
}

/// reqwest-backed Nomad client bound to one cluster address
#[derive(Debug, Clone)]
pub struct NomadClient {
    client: Client,
    base_url: Url,
}

impl NomadClient {
    pub fn new(client: Client, base_url: &str) -> Result<Self, FetchError> {
        Ok(Self {
            client,
            base_url: parse_base(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl OrchestratorApi for NomadClient {
    async fn list_jobs(&self) -> Result<Vec<JobListEntry>, FetchError> {
        let url = join_segments(&self.base_url, &["v1", "jobs"])?;
        get_json(&self.client, url).await
    }

    async fn job_spec(&self, job_id: &str) -> Result<JobSpec, FetchError> {
        let url = join_segments(&self.base_url, &["v1", "job", job_id])?;
        get_json(&self.client, url).await
    }

    async fn job_allocations(&self, job_id: &str) -> Result<Vec<AllocationStub>, FetchError> {
        let url = join_segments(&self.base_url, &["v1", "job", job_id, "allocations"])?;
        get_json(&self.client, url).await
    }

    async fn allocation_stats(&self, alloc_id: &str) -> Result<AllocationStats, FetchError> {
        let url = join_segments(
            &self.base_url,
            &["v1", "client", "allocation", alloc_id, "stats"],
        )?;
        get_json(&self.client, url).await
    }
}

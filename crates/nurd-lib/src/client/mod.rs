//! HTTP clients for Nomad and the metrics store
//!
//! The reconciler and calculator only see the [`OrchestratorApi`] and
//! [`MetricsApi`] traits; the concrete reqwest clients live in the
//! submodules and decode every response into typed structures.

pub mod nomad;
pub mod victoria;

pub use nomad::{
    AllocationStats, AllocationStub, CpuStats, EphemeralDisk, JobListEntry, JobSpec,
    JobSummary, MemoryStats, NomadClient, ResourceUsage, Task, TaskGroup, TaskResources,
};
pub use victoria::{QueryResponse, Series, VictoriaMetricsClient};

use crate::error::FetchError;
use crate::models::MetricKind;
use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

pub use async_trait::async_trait;

/// Default per-request deadline
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Read side of the Nomad HTTP API used by one cluster's poll
#[async_trait]
pub trait OrchestratorApi: Send + Sync {
    /// List every job registered in the cluster
    async fn list_jobs(&self) -> Result<Vec<JobListEntry>, FetchError>;

    /// Fetch a job's specification
    async fn job_spec(&self, job_id: &str) -> Result<JobSpec, FetchError>;

    /// List a job's allocations
    async fn job_allocations(&self, job_id: &str) -> Result<Vec<AllocationStub>, FetchError>;

    /// Fetch the live resource-usage snapshot of one allocation
    async fn allocation_stats(&self, alloc_id: &str) -> Result<AllocationStats, FetchError>;
}

/// Queries against the metrics store
#[async_trait]
pub trait MetricsApi: Send + Sync {
    /// Sum of a kind's series for one job, `None` when the store has no rows.
    /// The value is the raw sample, before unit conversion.
    async fn job_sum(&self, kind: MetricKind, job_name: &str) -> Result<Option<f64>, FetchError>;

    /// Allocation ids the store holds a series for, per kind and job
    async fn covered_allocations(
        &self,
        kind: MetricKind,
        job_name: &str,
    ) -> Result<HashSet<String>, FetchError>;
}

/// Build the HTTP client shared by every cluster connection
pub fn http_client(request_timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(request_timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Parse a configured base URL
pub(crate) fn parse_base(base: &str) -> Result<Url, FetchError> {
    let url = Url::parse(base).map_err(|_| FetchError::InvalidUrl(base.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(FetchError::InvalidUrl(base.to_string()));
    }
    Ok(url)
}

/// Append path segments to a base URL, escaping each one
pub(crate) fn join_segments(base: &Url, segments: &[&str]) -> Result<Url, FetchError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| FetchError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// GET a URL and decode a JSON body, mapping every failure to [`FetchError`]
pub(crate) async fn get_json<T: DeserializeOwned>(client: &Client, url: Url) -> Result<T, FetchError> {
    let display = url.to_string();

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| FetchError::Transport {
            url: display.clone(),
            source,
        })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|source| FetchError::Transport {
            url: display.clone(),
            source,
        })?;

    if !status.is_success() {
        return Err(FetchError::Status {
            url: display,
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|source| FetchError::Decode {
        url: display,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_segments_escapes_ids() {
        let base = parse_base("http://nomad:4646").unwrap();
        let url = join_segments(&base, &["v1", "job", "web api/1"]).unwrap();
        assert_eq!(url.as_str(), "http://nomad:4646/v1/job/web%20api%2F1");
    }

    #[test]
    fn test_join_segments_keeps_base_path() {
        let base = parse_base("http://proxy:8080/nomad/").unwrap();
        let url = join_segments(&base, &["v1", "jobs"]).unwrap();
        assert_eq!(url.as_str(), "http://proxy:8080/nomad/v1/jobs");
    }

    #[test]
    fn test_parse_base_rejects_garbage() {
        assert!(matches!(
            parse_base("not a url"),
            Err(FetchError::InvalidUrl(_))
        ));
    }
}

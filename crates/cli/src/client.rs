//! API client for the NURD query API

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// API client for the NURD query API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Every stored snapshot row
    pub async fn jobs(&self) -> Result<Vec<JobRow>> {
        let url = self.base_url.join("v1/jobs").context("Invalid path")?;
        self.get(url).await
    }

    /// Latest aggregate for a job, or every aggregate within `range`
    pub async fn job(&self, job_id: &str, range: Option<(&str, &str)>) -> Result<Vec<JobAggregate>> {
        let mut url = self.base_url.join("v1/job/").context("Invalid path")?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("API URL cannot be a base"))?
            .pop_if_empty()
            .push(job_id);

        if let Some((begin, end)) = range {
            url.query_pairs_mut()
                .append_pair("begin", begin)
                .append_pair("end", end);
        }

        self.get(url).await
    }

    /// Service health; an unhealthy service still reports its components
    pub async fn health(&self) -> Result<HealthReport> {
        let url = self.base_url.join("healthz").context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, error_message(&body));
        }

        response.json().await.context("Failed to parse response")
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, error_message(&body));
        }

        response.json().await.context("Failed to parse response")
    }
}

/// Prefer the `error` field of a JSON error body
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| body.to_string())
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRow {
    pub cluster: String,
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
    pub sample_time: String,
    pub inserted_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAggregate {
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
    pub inserted_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentReport {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub components: BTreeMap<String, ComponentReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

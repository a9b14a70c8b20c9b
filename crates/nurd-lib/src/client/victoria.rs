//! VictoriaMetrics / Prometheus instant-query client

use super::{get_json, join_segments, parse_base, MetricsApi};
use crate::error::FetchError;
use crate::models::MetricKind;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use url::Url;

/// Label carrying the Nomad allocation id on client allocation series
pub const ALLOC_ID_LABEL: &str = "alloc_id";

/// Body of `GET /api/v1/query`
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub data: Option<QueryData>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryData {
    #[serde(rename = "resultType", default)]
    pub result_type: Option<String>,
    #[serde(default)]
    pub result: Vec<Series>,
}

/// One instant-vector sample
#[derive(Debug, Clone, Deserialize)]
pub struct Series {
    #[serde(default)]
    pub metric: HashMap<String, String>,
    /// `[unix_timestamp, "value"]`
    #[serde(default)]
    pub value: Option<(f64, String)>,
}

impl Series {
    /// Parse the sample value
    pub fn sample(&self) -> Result<f64, FetchError> {
        let raw = self
            .value
            .as_ref()
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| FetchError::InvalidSample("<missing>".to_string()))?;
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| FetchError::InvalidSample(raw.to_string()))
    }
}

/// Escape a label value for use inside a double-quoted PromQL matcher
fn escape_label(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// `sum(<series>{job="<name>"}) by (job)`
pub fn job_sum_query(kind: MetricKind, job_name: &str) -> String {
    format!(
        "sum({}{{job=\"{}\"}}) by (job)",
        kind.series(),
        escape_label(job_name)
    )
}

/// `<series>{job="<name>"}`, one series per allocation
pub fn coverage_query(kind: MetricKind, job_name: &str) -> String {
    format!("{}{{job=\"{}\"}}", kind.series(), escape_label(job_name))
}

/// reqwest-backed metrics-store client
#[derive(Debug, Clone)]
pub struct VictoriaMetricsClient {
    client: Client,
    base_url: Url,
}

impl VictoriaMetricsClient {
    pub fn new(client: Client, base_url: &str) -> Result<Self, FetchError> {
        Ok(Self {
            client,
            base_url: parse_base(base_url)?,
        })
    }

    /// Run an instant query and return its result vector
    pub async fn instant_query(&self, query: &str) -> Result<Vec<Series>, FetchError> {
        let mut url = join_segments(&self.base_url, &["api", "v1", "query"])?;
        url.query_pairs_mut().append_pair("query", query);

        let response: QueryResponse = get_json(&self.client, url).await?;

        if response.status.as_deref() == Some("error") {
            return Err(FetchError::QueryFailed {
                query: query.to_string(),
                message: response.error.unwrap_or_default(),
            });
        }

        Ok(response.data.map(|d| d.result).unwrap_or_default())
    }
}

#[async_trait]
impl MetricsApi for VictoriaMetricsClient {
    async fn job_sum(&self, kind: MetricKind, job_name: &str) -> Result<Option<f64>, FetchError> {
        let series = self.instant_query(&job_sum_query(kind, job_name)).await?;
        match series.first() {
            Some(first) => first.sample().map(Some),
            None => Ok(None),
        }
    }

    async fn covered_allocations(
        &self,
        kind: MetricKind,
        job_name: &str,
    ) -> Result<HashSet<String>, FetchError> {
        let series = self.instant_query(&coverage_query(kind, job_name)).await?;
        Ok(series
            .into_iter()
            .filter_map(|mut s| s.metric.remove(ALLOC_ID_LABEL))
            .collect())
    }
}

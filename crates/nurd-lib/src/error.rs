//! Error types for remote fetches and snapshot persistence

use thiserror::Error;

/// Failure talking to Nomad or the metrics store
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid URL {0}")]
    InvalidUrl(String),

    #[error("query {query} failed: {message}")]
    QueryFailed { query: String, message: String },

    #[error("unparsable sample value {0:?}")]
    InvalidSample(String),
}

impl FetchError {
    /// True when the remote answered 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Status { status: 404, .. })
    }
}

/// Failure reading or writing snapshots
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt stored row: {0}")]
    Corrupt(String),
}

/// Where a non-fatal fetch failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStage {
    JobList,
    JobSpec,
    Allocations,
    MetricSum,
    MetricCoverage,
    AllocationStats,
}

impl FetchStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStage::JobList => "job_list",
            FetchStage::JobSpec => "job_spec",
            FetchStage::Allocations => "allocations",
            FetchStage::MetricSum => "metric_sum",
            FetchStage::MetricCoverage => "metric_coverage",
            FetchStage::AllocationStats => "allocation_stats",
        }
    }
}

impl std::fmt::Display for FetchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure that degraded a value to zero instead of aborting
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FetchIssue {
    pub stage: FetchStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<crate::models::MetricKind>,
    /// Job or allocation id the fetch was about
    pub subject: String,
    pub message: String,
}

impl FetchIssue {
    pub fn new(stage: FetchStage, subject: impl Into<String>, error: &FetchError) -> Self {
        Self {
            stage,
            kind: None,
            subject: subject.into(),
            message: error.to_string(),
        }
    }

    pub fn for_kind(mut self, kind: crate::models::MetricKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

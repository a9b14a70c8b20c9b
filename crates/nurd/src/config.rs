//! Service configuration and the cluster file

use anyhow::{Context, Result};
use nurd_lib::poller::ClusterSet;
use nurd_lib::ClusterAddress;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Database URL selecting the in-process store
pub const MEMORY_STORE: &str = "memory";

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Query API, health and metrics port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// JSON file listing the clusters to poll
    #[serde(default = "default_cluster_file")]
    pub cluster_file: PathBuf,

    /// Polling interval in seconds, (0, 1800]
    #[serde(default = "default_aggregate_frequency")]
    pub aggregate_frequency_secs: u64,

    /// SQLite URL, or `memory`
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Per-request deadline for Nomad and VictoriaMetrics calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    #[serde(default = "default_fallback_concurrency")]
    pub fallback_concurrency: usize,
}

fn default_api_port() -> u16 {
    8080
}

fn default_cluster_file() -> PathBuf {
    PathBuf::from("/etc/nurd/config.json")
}

fn default_aggregate_frequency() -> u64 {
    900
}

fn default_database_url() -> String {
    "sqlite://nurd.db".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_concurrent_jobs() -> usize {
    16
}

fn default_fallback_concurrency() -> usize {
    8
}

impl ServiceConfig {
    /// Load configuration from `NURD_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_environment(config::Environment::with_prefix("NURD"))
    }

    fn from_environment(environment: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(environment.try_parsing(true))
            .build()
            .context("Failed to read environment configuration")?;

        config
            .try_deserialize()
            .context("Invalid service configuration")
    }

    #[cfg(test)]
    fn from_map(vars: std::collections::HashMap<String, String>) -> Result<Self> {
        Self::from_environment(config::Environment::with_prefix("NURD").source(Some(vars)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Port {
    Number(u16),
    Text(String),
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::Number(port) => write!(f, "{port}"),
            Port::Text(port) => f.write_str(port.trim()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Endpoint {
    #[serde(rename = "URL")]
    url: String,
    #[serde(rename = "Port")]
    port: Port,
}

impl Endpoint {
    /// `host:port` with any scheme removed
    fn host_port(&self) -> String {
        let host = self.url.trim().trim_end_matches('/');
        let host = host.split_once("://").map_or(host, |(_, rest)| rest);
        format!("{host}:{}", self.port)
    }

    /// Base URL, defaulting the scheme to `http`
    fn base_url(&self) -> String {
        let url = self.url.trim().trim_end_matches('/');
        if url.contains("://") {
            format!("{url}:{}", self.port)
        } else {
            format!("http://{url}:{}", self.port)
        }
    }
}

#[derive(Debug, Deserialize)]
struct NomadEntry {
    #[serde(flatten)]
    endpoint: Endpoint,
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "Metrics", default)]
    metrics: Option<Endpoint>,
}

#[derive(Debug, Deserialize)]
struct ClusterFile {
    #[serde(rename = "VictoriaMetrics")]
    victoria_metrics: Endpoint,
    #[serde(rename = "Nomad", default)]
    nomad: Vec<NomadEntry>,
}

/// Parse cluster file contents into addresses, in file order
pub fn parse_cluster_file(contents: &str) -> Result<ClusterSet> {
    let file: ClusterFile =
        serde_json::from_str(contents).context("Cluster file is not valid JSON")?;

    let shared_metrics = file.victoria_metrics.base_url();
    let addresses = file
        .nomad
        .into_iter()
        .map(|entry| ClusterAddress {
            name: entry
                .name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| entry.endpoint.host_port()),
            orchestrator_url: entry.endpoint.base_url(),
            metrics_url: entry
                .metrics
                .as_ref()
                .map_or_else(|| shared_metrics.clone(), Endpoint::base_url),
        })
        .collect();

    Ok(ClusterSet::new(addresses))
}

pub fn load_cluster_file(path: &Path) -> Result<ClusterSet> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read cluster file {}", path.display()))?;
    parse_cluster_file(&contents)
        .with_context(|| format!("Failed to parse cluster file {}", path.display()))
}

//! Cluster fan-out polling
//!
//! A cycle reads one immutable [`ClusterSet`], polls every address
//! concurrently and produces one snapshot per (cluster, job). The
//! [`PollingLoop`] drives cycles on a fixed interval and persists them.

mod cycle;
mod r#loop;


pub use cycle::{
    dedupe_snapshots, ClusterOutcome, ClusterPoller, ClusterStatus, CycleReport, PollerConfig,
};
pub use r#loop::{
    effective_interval, PollingLoop, PollingLoopBuilder, DEFAULT_INTERVAL, MAX_INTERVAL,
};

use crate::client::{MetricsApi, NomadClient, OrchestratorApi, VictoriaMetricsClient};
use crate::error::FetchError;
use crate::models::ClusterAddress;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Cluster addresses for one or more cycles, in configuration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSet {
    addresses: Vec<ClusterAddress>,
}

impl ClusterSet {
    pub fn new(addresses: Vec<ClusterAddress>) -> Self {
        Self { addresses }
    }

    pub fn addresses(&self) -> &[ClusterAddress] {
        &self.addresses
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// Shared, swappable cluster set.
///
/// Readers take an `Arc` snapshot; a reload replaces it wholesale so a
/// running cycle keeps the set it started with.
#[derive(Debug, Clone, Default)]
pub struct ClusterSetHandle {
    inner: Arc<RwLock<Arc<ClusterSet>>>,
}

impl ClusterSetHandle {
    pub fn new(set: ClusterSet) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(set))),
        }
    }

    pub async fn current(&self) -> Arc<ClusterSet> {
        self.inner.read().await.clone()
    }

    pub async fn replace(&self, set: ClusterSet) {
        let mut guard = self.inner.write().await;
        *guard = Arc::new(set);
    }
}

/// API clients bound to one cluster address
#[derive(Clone)]
pub struct ClusterClients {
    pub orchestrator: Arc<dyn OrchestratorApi>,
    pub metrics: Arc<dyn MetricsApi>,
}

/// Builds clients for a cluster address
pub trait ClusterConnector: Send + Sync {
    fn connect(&self, address: &ClusterAddress) -> Result<ClusterClients, FetchError>;
}

/// reqwest-backed connector sharing one HTTP client across clusters
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: Client,
}

impl HttpConnector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl ClusterConnector for HttpConnector {
    fn connect(&self, address: &ClusterAddress) -> Result<ClusterClients, FetchError> {
        let orchestrator = NomadClient::new(self.client.clone(), &address.orchestrator_url)?;
        let metrics = VictoriaMetricsClient::new(self.client.clone(), &address.metrics_url)?;
        Ok(ClusterClients {
            orchestrator: Arc::new(orchestrator),
            metrics: Arc::new(metrics),
        })
    }
}

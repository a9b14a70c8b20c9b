//! Core library for the Nomad usage & resource digest
//!
//! This crate provides the core functionality for:
//! - Nomad and VictoriaMetrics HTTP clients
//! - Usage reconciliation between the metrics store and Nomad allocation stats
//! - Requested-resource calculation from job specifications
//! - Fan-out polling across clusters and the periodic polling loop
//! - Snapshot persistence and the read-only query API
//! - Health checks and observability

pub mod api;
pub mod client;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod poller;
pub mod reconcile;
pub mod requested;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{FetchError, FetchIssue, FetchStage, StoreError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{PollerMetrics, StructuredLogger};

//! In-process snapshot store

use super::{aggregate_rows, SnapshotStore};
use crate::error::StoreError;
use crate::models::{JobUsageAggregate, JobUsageSnapshot, StoredSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Keeps every row in memory; used by tests and `NURD_DATABASE_URL=memory`
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    rows: RwLock<Vec<StoredSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn insert(
        &self,
        snapshot: &JobUsageSnapshot,
        inserted_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.rows.write().await.push(StoredSnapshot {
            snapshot: snapshot.clone(),
            inserted_at,
        });
        Ok(())
    }

    async fn insert_batch(
        &self,
        snapshots: &[JobUsageSnapshot],
        inserted_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut rows = self.rows.write().await;
        rows.extend(snapshots.iter().map(|snapshot| StoredSnapshot {
            snapshot: snapshot.clone(),
            inserted_at,
        }));
        Ok(snapshots.len())
    }

    async fn all_rows(&self) -> Result<Vec<StoredSnapshot>, StoreError> {
        Ok(self.rows.read().await.clone())
    }

    async fn latest_for_job(&self, job_id: &str) -> Result<Vec<JobUsageAggregate>, StoreError> {
        let rows = self.rows.read().await;

        let latest = rows
            .iter()
            .filter(|r| r.snapshot.job_id == job_id)
            .map(|r| r.inserted_at)
            .max();

        Ok(match latest {
            Some(latest) => aggregate_rows(
                rows.iter()
                    .filter(|r| r.snapshot.job_id == job_id && r.inserted_at == latest),
            ),
            None => Vec::new(),
        })
    }

    async fn range_for_job(
        &self,
        job_id: &str,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<JobUsageAggregate>, StoreError> {
        let rows = self.rows.read().await;
        Ok(aggregate_rows(rows.iter().filter(|r| {
            r.snapshot.job_id == job_id && r.inserted_at >= begin && r.inserted_at <= end
        })))
    }
}

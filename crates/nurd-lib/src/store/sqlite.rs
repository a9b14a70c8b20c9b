//! SQLite snapshot store

use super::{format_timestamp, parse_timestamp, SnapshotStore};
use crate::error::StoreError;
use crate::models::{JobUsageAggregate, JobUsageSnapshot, StoredSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;

const INSERT_SQL: &str = r#"
    INSERT INTO job_usage (
        cluster, job_id, name, namespace, datacenters,
        used_cpu_ticks, used_resident_memory, used_page_cache,
        requested_cpu, requested_memory_mb, requested_disk_mb, requested_iops,
        degraded, sample_time, inserted_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const AGGREGATE_COLUMNS: &str = r#"
    job_id, name, namespace, datacenters,
    SUM(used_cpu_ticks) AS used_cpu_ticks,
    SUM(used_resident_memory) AS used_resident_memory,
    SUM(used_page_cache) AS used_page_cache,
    SUM(requested_cpu) AS requested_cpu,
    SUM(requested_memory_mb) AS requested_memory_mb,
    SUM(requested_disk_mb) AS requested_disk_mb,
    SUM(requested_iops) AS requested_iops,
    MAX(degraded) AS degraded,
    inserted_at
"#;

pub struct SqliteSnapshotStore {
    pool: SqlitePool,
}

impl SqliteSnapshotStore {
    /// Open (creating if needed) the database and run migrations
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Each in-memory connection is its own database, so keep exactly one alive.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:").await
    }

    /// Retry `connect` with a fixed delay between attempts
    pub async fn connect_with_retry(
        database_url: &str,
        attempts: u32,
        delay: Duration,
    ) -> Result<Self, StoreError> {
        let mut attempt = 1;
        loop {
            match Self::connect(database_url).await {
                Ok(store) => return Ok(store),
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        attempt = attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Failed to open snapshot store, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_usage (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cluster TEXT NOT NULL,
                job_id TEXT NOT NULL,
                name TEXT NOT NULL,
                namespace TEXT NOT NULL,
                datacenters TEXT NOT NULL,
                used_cpu_ticks REAL NOT NULL,
                used_resident_memory REAL NOT NULL,
                used_page_cache REAL NOT NULL,
                requested_cpu REAL NOT NULL,
                requested_memory_mb REAL NOT NULL,
                requested_disk_mb REAL NOT NULL,
                requested_iops REAL NOT NULL,
                degraded INTEGER NOT NULL DEFAULT 0,
                sample_time TEXT NOT NULL,
                inserted_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_job_usage_job_time ON job_usage(job_id, inserted_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn insert_query<'q>(
        snapshot: &'q JobUsageSnapshot,
        inserted_at: String,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        sqlx::query(INSERT_SQL)
            .bind(snapshot.cluster.as_str())
            .bind(snapshot.job_id.as_str())
            .bind(snapshot.name.as_str())
            .bind(snapshot.namespace.as_str())
            .bind(snapshot.datacenters.as_str())
            .bind(snapshot.used_cpu_ticks)
            .bind(snapshot.used_resident_memory)
            .bind(snapshot.used_page_cache)
            .bind(snapshot.requested_cpu)
            .bind(snapshot.requested_memory_mb)
            .bind(snapshot.requested_disk_mb)
            .bind(snapshot.requested_iops)
            .bind(snapshot.degraded)
            .bind(format_timestamp(snapshot.sample_time))
            .bind(inserted_at)
    }

    fn parse_time(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, StoreError> {
        let raw: String = row.try_get(column)?;
        parse_timestamp(&raw)
            .ok_or_else(|| StoreError::Corrupt(format!("{column} = {raw:?}")))
    }

    fn parse_snapshot_row(row: &SqliteRow) -> Result<StoredSnapshot, StoreError> {
        Ok(StoredSnapshot {
            snapshot: JobUsageSnapshot {
                cluster: row.try_get("cluster")?,
                job_id: row.try_get("job_id")?,
                name: row.try_get("name")?,
                namespace: row.try_get("namespace")?,
                datacenters: row.try_get("datacenters")?,
                used_cpu_ticks: row.try_get("used_cpu_ticks")?,
                used_resident_memory: row.try_get("used_resident_memory")?,
                used_page_cache: row.try_get("used_page_cache")?,
                requested_cpu: row.try_get("requested_cpu")?,
                requested_memory_mb: row.try_get("requested_memory_mb")?,
                requested_disk_mb: row.try_get("requested_disk_mb")?,
                requested_iops: row.try_get("requested_iops")?,
                degraded: row.try_get("degraded")?,
                sample_time: Self::parse_time(row, "sample_time")?,
            },
            inserted_at: Self::parse_time(row, "inserted_at")?,
        })
    }

    fn parse_aggregate_row(row: &SqliteRow) -> Result<JobUsageAggregate, StoreError> {
        let degraded: i64 = row.try_get("degraded")?;
        Ok(JobUsageAggregate {
            job_id: row.try_get("job_id")?,
            name: row.try_get("name")?,
            namespace: row.try_get("namespace")?,
            datacenters: row.try_get("datacenters")?,
            used_cpu_ticks: row.try_get("used_cpu_ticks")?,
            used_resident_memory: row.try_get("used_resident_memory")?,
            used_page_cache: row.try_get("used_page_cache")?,
            requested_cpu: row.try_get("requested_cpu")?,
            requested_memory_mb: row.try_get("requested_memory_mb")?,
            requested_disk_mb: row.try_get("requested_disk_mb")?,
            requested_iops: row.try_get("requested_iops")?,
            degraded: degraded != 0,
            inserted_at: Self::parse_time(row, "inserted_at")?,
        })
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn insert(
        &self,
        snapshot: &JobUsageSnapshot,
        inserted_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Self::insert_query(snapshot, format_timestamp(inserted_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_batch(
        &self,
        snapshots: &[JobUsageSnapshot],
        inserted_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let inserted_at = format_timestamp(inserted_at);
        let mut tx = self.pool.begin().await?;
        for snapshot in snapshots {
            Self::insert_query(snapshot, inserted_at.clone())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(snapshots.len())
    }

    async fn all_rows(&self) -> Result<Vec<StoredSnapshot>, StoreError> {
        let rows = sqlx::query("SELECT * FROM job_usage ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::parse_snapshot_row).collect()
    }

    async fn latest_for_job(&self, job_id: &str) -> Result<Vec<JobUsageAggregate>, StoreError> {
        let sql = format!(
            r#"
            SELECT {AGGREGATE_COLUMNS}
            FROM job_usage
            WHERE job_id = ?
              AND inserted_at = (SELECT MAX(inserted_at) FROM job_usage WHERE job_id = ?)
            GROUP BY job_id, name, namespace, datacenters, inserted_at
            ORDER BY name, namespace, datacenters
        "#
        );

        let rows = sqlx::query(&sql)
            .bind(job_id)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::parse_aggregate_row).collect()
    }

    async fn range_for_job(
        &self,
        job_id: &str,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<JobUsageAggregate>, StoreError> {
        let sql = format!(
            r#"
            SELECT {AGGREGATE_COLUMNS}
            FROM job_usage
            WHERE job_id = ? AND inserted_at BETWEEN ? AND ?
            GROUP BY job_id, name, namespace, datacenters, inserted_at
            ORDER BY inserted_at DESC, name, namespace, datacenters
        "#
        );

        let rows = sqlx::query(&sql)
            .bind(job_id)
            .bind(format_timestamp(begin))
            .bind(format_timestamp(end))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::parse_aggregate_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    async fn store() -> SqliteSnapshotStore {
        SqliteSnapshotStore::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let store = store().await;
        let original = snapshot("east", "web", 12.5, true);

        store.insert(&original, at(3, 0)).await.unwrap();

        let rows = store.all_rows().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].snapshot, original);
        assert_eq!(rows[0].inserted_at, at(3, 0));
    }

    #[tokio::test]
    async fn test_batch_shares_inserted_at() {
        let store = store().await;
        let written = store
            .insert_batch(
                &[
                    snapshot("east", "web", 1.0, false),
                    snapshot("east", "api", 2.0, false),
                ],
                at(4, 0),
            )
            .await
            .unwrap();
        assert_eq!(written, 2);

        let rows = store.all_rows().await.unwrap();
        assert!(rows.iter().all(|r| r.inserted_at == at(4, 0)));
    }

    #[tokio::test]
    async fn test_latest_aggregates_job_scoped_max() {
        let store = store().await;
        store
            .insert_batch(&[snapshot("east", "web", 1.0, false)], at(1, 0))
            .await
            .unwrap();
        store
            .insert_batch(
                &[
                    snapshot("east", "web", 2.0, false),
                    snapshot("west", "web", 3.0, true),
                ],
                at(2, 0),
            )
            .await
            .unwrap();
        store
            .insert_batch(&[snapshot("east", "other", 9.0, false)], at(3, 0))
            .await
            .unwrap();

        let latest = store.latest_for_job("web").await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].inserted_at, at(2, 0));
        assert_eq!(latest[0].used_cpu_ticks, 5.0);
        assert_eq!(latest[0].requested_cpu, 200.0);
        assert!(latest[0].degraded);
    }

    #[tokio::test]
    async fn test_range_inclusive_newest_first() {
        let store = store().await;
        for hour in 1..=4 {
            store
                .insert(&snapshot("east", "web", hour as f64, false), at(hour, 0))
                .await
                .unwrap();
        }

        let range = store.range_for_job("web", at(2, 0), at(3, 0)).await.unwrap();
        let ticks: Vec<f64> = range.iter().map(|a| a.used_cpu_ticks).collect();
        assert_eq!(ticks, vec![3.0, 2.0]);
        assert!(range.iter().all(|a| !a.degraded));
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = store().await;
        assert!(store.all_rows().await.unwrap().is_empty());
        assert!(store.latest_for_job("web").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_with_retry_gives_up() {
        let result = SqliteSnapshotStore::connect_with_retry(
            "sqlite:///nonexistent-dir/for/sure/nurd.db",
            2,
            Duration::from_millis(1),
        )
        .await;
        assert!(matches!(result, Err(StoreError::Database(_))));
    }
}

//! Append-only snapshot persistence
//!
//! Snapshots are written once per cycle with a shared `inserted_at`
//! (truncated to the minute). Reads aggregate a job's rows per insertion
//! instant, summing every numeric field across clusters.

mod memory;
mod sqlite;

pub use memory::MemorySnapshotStore;
pub use sqlite::SqliteSnapshotStore;

use crate::error::StoreError;
use crate::models::{JobUsageAggregate, JobUsageSnapshot, StoredSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Storage and query-parameter timestamp format (UTC)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn insert(
        &self,
        snapshot: &JobUsageSnapshot,
        inserted_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Insert a cycle's snapshots under one `inserted_at`
    async fn insert_batch(
        &self,
        snapshots: &[JobUsageSnapshot],
        inserted_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        for snapshot in snapshots {
            self.insert(snapshot, inserted_at).await?;
        }
        Ok(snapshots.len())
    }

    /// Every stored row, oldest first
    async fn all_rows(&self) -> Result<Vec<StoredSnapshot>, StoreError>;

    /// Aggregates at the job's most recent `inserted_at`
    async fn latest_for_job(&self, job_id: &str) -> Result<Vec<JobUsageAggregate>, StoreError>;

    /// Aggregates with `begin <= inserted_at <= end`, newest first
    async fn range_for_job(
        &self,
        job_id: &str,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<JobUsageAggregate>, StoreError>;
}

pub fn truncate_to_minute(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(instant)
}

pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

/// Accepts `YYYY-MM-DD HH:MM:SS` (UTC) or RFC 3339
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT) {
        return Some(Utc.from_utc_datetime(&naive));
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

type GroupKey = (Reverse<DateTime<Utc>>, String, String, String, String);

/// Group rows by (job, name, namespace, datacenters, inserted_at), newest first
pub fn aggregate_rows<'a, I>(rows: I) -> Vec<JobUsageAggregate>
where
    I: IntoIterator<Item = &'a StoredSnapshot>,
{
    let mut groups: BTreeMap<GroupKey, JobUsageAggregate> = BTreeMap::new();

    for row in rows {
        let s = &row.snapshot;
        let key = (
            Reverse(row.inserted_at),
            s.job_id.clone(),
            s.name.clone(),
            s.namespace.clone(),
            s.datacenters.clone(),
        );

        let aggregate = groups.entry(key).or_insert_with(|| JobUsageAggregate {
            job_id: s.job_id.clone(),
            name: s.name.clone(),
            namespace: s.namespace.clone(),
            datacenters: s.datacenters.clone(),
            used_cpu_ticks: 0.0,
            used_resident_memory: 0.0,
            used_page_cache: 0.0,
            requested_cpu: 0.0,
            requested_memory_mb: 0.0,
            requested_disk_mb: 0.0,
            requested_iops: 0.0,
            degraded: false,
            inserted_at: row.inserted_at,
        });

        aggregate.used_cpu_ticks += s.used_cpu_ticks;
        aggregate.used_resident_memory += s.used_resident_memory;
        aggregate.used_page_cache += s.used_page_cache;
        aggregate.requested_cpu += s.requested_cpu;
        aggregate.requested_memory_mb += s.requested_memory_mb;
        aggregate.requested_disk_mb += s.requested_disk_mb;
        aggregate.requested_iops += s.requested_iops;
        aggregate.degraded |= s.degraded;
    }

    groups.into_values().collect()
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_truncate_to_minute() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 34, 56).unwrap()
            + chrono::Duration::milliseconds(789);
        assert_eq!(truncate_to_minute(t), at(12, 34));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(parse_timestamp("2024-03-01 12:34:00"), Some(at(12, 34)));
        assert_eq!(parse_timestamp("2024-03-01T12:34:00Z"), Some(at(12, 34)));
        assert_eq!(
            parse_timestamp("2024-03-01T14:34:00+02:00"),
            Some(at(12, 34))
        );
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(format_timestamp(at(9, 5)), "2024-03-01 09:05:00");
    }

    #[test]
    fn test_aggregate_sums_per_instant() {
        let rows = vec![
            StoredSnapshot {
                snapshot: snapshot("east", "web", 10.0, false),
                inserted_at: at(1, 0),
            },
            StoredSnapshot {
                snapshot: snapshot("west", "web", 5.0, true),
                inserted_at: at(1, 0),
            },
            StoredSnapshot {
                snapshot: snapshot("east", "web", 7.0, false),
                inserted_at: at(2, 0),
            },
        ];

        let aggregates = aggregate_rows(&rows);
        assert_eq!(aggregates.len(), 2);

        assert_eq!(aggregates[0].inserted_at, at(2, 0));
        assert_eq!(aggregates[0].used_cpu_ticks, 7.0);
        assert!(!aggregates[0].degraded);

        assert_eq!(aggregates[1].inserted_at, at(1, 0));
        assert_eq!(aggregates[1].used_cpu_ticks, 15.0);
        assert_eq!(aggregates[1].requested_cpu, 200.0);
        assert!(aggregates[1].degraded);
    }
}

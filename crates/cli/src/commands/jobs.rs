//! Job snapshot commands

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDateTime};
use tabled::Tabled;

use crate::client::{ApiClient, JobAggregate, JobRow};
use crate::output::{format_amount, format_degraded, print_table, OutputFormat};

/// Row for the stored snapshots table
#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "Inserted")]
    inserted_at: String,
    #[tabled(rename = "Cluster")]
    cluster: String,
    #[tabled(rename = "Job")]
    job_id: String,
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "CPU Ticks")]
    cpu_ticks: String,
    #[tabled(rename = "RSS MB")]
    resident_memory: String,
    #[tabled(rename = "Cache MB")]
    page_cache: String,
    #[tabled(rename = "Req CPU")]
    requested_cpu: String,
    #[tabled(rename = "Req Mem MB")]
    requested_memory: String,
    #[tabled(rename = "Degraded")]
    degraded: String,
}

impl From<&JobRow> for SnapshotRow {
    fn from(row: &JobRow) -> Self {
        Self {
            inserted_at: row.inserted_at.clone(),
            cluster: row.cluster.clone(),
            job_id: row.job_id.clone(),
            namespace: row.namespace.clone(),
            cpu_ticks: format_amount(row.used_cpu_ticks),
            resident_memory: format_amount(row.used_resident_memory),
            page_cache: format_amount(row.used_page_cache),
            requested_cpu: format_amount(row.requested_cpu),
            requested_memory: format_amount(row.requested_memory_mb),
            degraded: format_degraded(row.degraded),
        }
    }
}

/// Row for the per-instant aggregate table
#[derive(Tabled)]
struct AggregateRow {
    #[tabled(rename = "Inserted")]
    inserted_at: String,
    #[tabled(rename = "Job")]
    job_id: String,
    #[tabled(rename = "Datacenters")]
    datacenters: String,
    #[tabled(rename = "CPU Ticks")]
    cpu_ticks: String,
    #[tabled(rename = "RSS MB")]
    resident_memory: String,
    #[tabled(rename = "Cache MB")]
    page_cache: String,
    #[tabled(rename = "Req CPU")]
    requested_cpu: String,
    #[tabled(rename = "Req Mem MB")]
    requested_memory: String,
    #[tabled(rename = "Req Disk MB")]
    requested_disk: String,
    #[tabled(rename = "Degraded")]
    degraded: String,
}

impl From<&JobAggregate> for AggregateRow {
    fn from(aggregate: &JobAggregate) -> Self {
        Self {
            inserted_at: aggregate.inserted_at.clone(),
            job_id: aggregate.job_id.clone(),
            datacenters: aggregate.datacenters.clone(),
            cpu_ticks: format_amount(aggregate.used_cpu_ticks),
            resident_memory: format_amount(aggregate.used_resident_memory),
            page_cache: format_amount(aggregate.used_page_cache),
            requested_cpu: format_amount(aggregate.requested_cpu),
            requested_memory: format_amount(aggregate.requested_memory_mb),
            requested_disk: format_amount(aggregate.requested_disk_mb),
            degraded: format_degraded(aggregate.degraded),
        }
    }
}

/// List every stored snapshot
pub async fn list_jobs(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let rows = client.jobs().await?;
    print_table(
        &rows,
        |rows| rows.iter().map(SnapshotRow::from).collect(),
        format,
    )
}

/// Show a job's latest aggregate, or its history between `begin` and `end`
pub async fn show_job(
    client: &ApiClient,
    job_id: &str,
    begin: Option<String>,
    end: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let range = match (&begin, &end) {
        (Some(begin), Some(end)) => {
            validate_timestamp("begin", begin)?;
            validate_timestamp("end", end)?;
            Some((begin.as_str(), end.as_str()))
        }
        (None, None) => None,
        _ => bail!("--begin and --end must be given together"),
    };

    let aggregates = client.job(job_id, range).await?;
    print_table(
        &aggregates,
        |aggregates| aggregates.iter().map(AggregateRow::from).collect(),
        format,
    )
}

/// Accepts `YYYY-MM-DD HH:MM:SS` (UTC) or RFC 3339, like the API
fn validate_timestamp(name: &str, value: &str) -> Result<()> {
    let valid = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").is_ok()
        || DateTime::parse_from_rfc3339(value).is_ok();
    if !valid {
        bail!("Invalid --{name} {value:?}: expected 'YYYY-MM-DD HH:MM:SS' or RFC 3339");
    }
    Ok(())
}

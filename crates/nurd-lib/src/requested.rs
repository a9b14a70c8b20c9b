//! Requested-resource calculation from job specifications

use crate::client::{AllocationStub, OrchestratorApi, TaskGroup};
use crate::error::{FetchIssue, FetchStage};
use crate::models::{RequestedResources, SchedulingType};
use std::collections::HashMap;
use std::sync::Arc;

/// Result of computing one job's requested resources
#[derive(Debug, Clone, Default)]
pub struct RequestedReport {
    pub requested: RequestedResources,
    pub issues: Vec<FetchIssue>,
}

/// Sums what a job's specification asks for, scaled by its effective count
#[derive(Clone)]
pub struct RequestedCalculator {
    orchestrator: Arc<dyn OrchestratorApi>,
}

impl RequestedCalculator {
    pub fn new(orchestrator: Arc<dyn OrchestratorApi>) -> Self {
        Self { orchestrator }
    }

    pub async fn compute(&self, job_id: &str, scheduling_type: SchedulingType) -> RequestedReport {
        let mut report = RequestedReport::default();

        let spec = match self.orchestrator.job_spec(job_id).await {
            Ok(spec) => spec,
            Err(e) if e.is_not_found() => {
                tracing::debug!(job_id = %job_id, "Job disappeared before its spec was read");
                return report;
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to fetch job spec");
                report
                    .issues
                    .push(FetchIssue::new(FetchStage::JobSpec, job_id, &e));
                return report;
            }
        };

        let groups = spec.task_groups.unwrap_or_default();
        if groups.is_empty() {
            return report;
        }

        report.requested = match scheduling_type {
            SchedulingType::Replicated => sum_requested(&groups, |group| group.count),
            SchedulingType::FleetWide => match self.orchestrator.job_allocations(job_id).await {
                Ok(allocations) => {
                    let counts = live_counts(&allocations);
                    sum_requested(&groups, |group| {
                        counts.get(group.name.as_str()).copied().unwrap_or(0.0)
                    })
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job_id,
                        error = %e,
                        "Failed to list allocations for fleet-wide job"
                    );
                    report
                        .issues
                        .push(FetchIssue::new(FetchStage::Allocations, job_id, &e));
                    RequestedResources::default()
                }
            },
        };

        report
    }
}

/// Live allocations per task-group name
pub fn live_counts(allocations: &[AllocationStub]) -> HashMap<&str, f64> {
    let mut counts = HashMap::new();
    for allocation in allocations.iter().filter(|a| a.is_live()) {
        *counts.entry(allocation.task_group.as_str()).or_insert(0.0) += 1.0;
    }
    counts
}

/// Accumulate task resources and ephemeral disk over the groups in spec order
pub fn sum_requested<F>(groups: &[TaskGroup], count_for: F) -> RequestedResources
where
    F: Fn(&TaskGroup) -> f64,
{
    let mut requested = RequestedResources::default();

    for group in groups {
        let count = count_for(group);

        for resources in group.tasks.iter().filter_map(|t| t.resources) {
            requested.cpu += resources.cpu * count;
            requested.memory_mb += resources.memory_mb * count;
            requested.iops += resources.iops * count;
        }

        if let Some(disk) = group.ephemeral_disk {
            requested.disk_mb += disk.size_mb * count;
        }
    }

    requested
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{alloc, group, task, MockOrchestrator};

    fn two_group_spec() -> Vec<TaskGroup> {
        vec![
            group("group1", 3.0, vec![task(200.0, 256.0, 0.0)], Some(300.0)),
            group("group2", 2.0, vec![task(400.0, 512.0, 10.0)], Some(150.0)),
        ]
    }

    fn fleet_allocations(group1: usize, group2: usize) -> Vec<AllocationStub> {
        let mut allocations = Vec::new();
        for i in 0..group1 {
            allocations.push(alloc(&format!("g1-{i}"), "group1", Some("running")));
        }
        for i in 0..group2 {
            allocations.push(alloc(&format!("g2-{i}"), "group2", Some("running")));
        }
        allocations
    }

    #[tokio::test]
    async fn test_replicated_uses_declared_count() {
        let orchestrator = MockOrchestrator::new().with_spec("web", two_group_spec());
        let calculator = RequestedCalculator::new(Arc::new(orchestrator));

        let report = calculator.compute("web", SchedulingType::Replicated).await;

        assert!(report.issues.is_empty());
        assert_eq!(report.requested.cpu, 1400.0);
        assert_eq!(report.requested.memory_mb, 3.0 * 256.0 + 2.0 * 512.0);
        assert_eq!(report.requested.disk_mb, 3.0 * 300.0 + 2.0 * 150.0);
        assert_eq!(report.requested.iops, 20.0);
    }

    #[tokio::test]
    async fn test_fleet_wide_matching_counts() {
        let orchestrator = MockOrchestrator::new()
            .with_spec("agent", two_group_spec())
            .with_allocations("agent", fleet_allocations(3, 2));
        let calculator = RequestedCalculator::new(Arc::new(orchestrator));

        let report = calculator.compute("agent", SchedulingType::FleetWide).await;
        assert_eq!(report.requested.cpu, 1400.0);
    }

    #[tokio::test]
    async fn test_fleet_wide_uses_live_counts() {
        let orchestrator = MockOrchestrator::new()
            .with_spec("agent", two_group_spec())
            .with_allocations("agent", fleet_allocations(2, 1));
        let calculator = RequestedCalculator::new(Arc::new(orchestrator));

        let report = calculator.compute("agent", SchedulingType::FleetWide).await;
        assert_eq!(report.requested.cpu, 800.0);
        assert_eq!(report.requested.disk_mb, 2.0 * 300.0 + 150.0);
    }

    #[test]
    fn test_live_counts_ignore_terminal_allocations() {
        let allocations = vec![
            alloc("a", "group1", Some("running")),
            alloc("b", "group1", Some("pending")),
            alloc("c", "group1", None),
            alloc("d", "group1", Some("complete")),
            alloc("e", "group1", Some("failed")),
            alloc("f", "group2", Some("lost")),
        ];

        let counts = live_counts(&allocations);
        assert_eq!(counts.get("group1"), Some(&3.0));
        assert_eq!(counts.get("group2"), None);
    }

    #[tokio::test]
    async fn test_deleted_job_is_zero_without_issue() {
        let calculator = RequestedCalculator::new(Arc::new(MockOrchestrator::new()));

        let report = calculator.compute("gone", SchedulingType::Replicated).await;
        assert_eq!(report.requested, RequestedResources::default());
        assert!(report.issues.is_empty());
    }

    #[tokio::test]
    async fn test_no_task_groups_is_zero() {
        let orchestrator = MockOrchestrator::new().with_spec("empty", vec![]);
        let calculator = RequestedCalculator::new(Arc::new(orchestrator));

        let report = calculator.compute("empty", SchedulingType::FleetWide).await;
        assert_eq!(report.requested, RequestedResources::default());
        assert!(report.issues.is_empty());
    }

    #[tokio::test]
    async fn test_spec_failure_records_issue() {
        let mut orchestrator = MockOrchestrator::new();
        orchestrator.failing_specs.insert("web".to_string());
        let calculator = RequestedCalculator::new(Arc::new(orchestrator));

        let report = calculator.compute("web", SchedulingType::Replicated).await;
        assert_eq!(report.requested, RequestedResources::default());
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].stage, FetchStage::JobSpec);
    }

    #[tokio::test]
    async fn test_fleet_wide_allocation_failure_records_issue() {
        let mut orchestrator = MockOrchestrator::new().with_spec("agent", two_group_spec());
        orchestrator.failing_allocations.insert("agent".to_string());
        let calculator = RequestedCalculator::new(Arc::new(orchestrator));

        let report = calculator.compute("agent", SchedulingType::FleetWide).await;
        assert_eq!(report.requested, RequestedResources::default());
        assert_eq!(report.issues[0].stage, FetchStage::Allocations);
    }

    #[test]
    fn test_tasks_without_resources_contribute_nothing() {
        let groups = vec![group(
            "api",
            2.0,
            vec![crate::client::Task { resources: None }, task(100.0, 64.0, 0.0)],
            None,
        )];

        let requested = sum_requested(&groups, |g| g.count);
        assert_eq!(requested.cpu, 200.0);
        assert_eq!(requested.disk_mb, 0.0);
    }
}

//! Gap sets: allocations the metrics store does not cover, per kind

use crate::models::MetricKind;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Allocation id -> kinds that must be fetched from Nomad for it.
///
/// Ordered by allocation id so that fallback contributions are always summed
/// in the same order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GapSet {
    entries: BTreeMap<String, BTreeSet<MetricKind>>,
}

impl GapSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every orchestrator allocation missing from `covered` as a gap for `kind`
    pub fn record<'a, I>(&mut self, kind: MetricKind, orchestrator: I, covered: &HashSet<String>)
    where
        I: IntoIterator<Item = &'a String>,
    {
        for alloc_id in orchestrator {
            if !covered.contains(alloc_id) {
                self.entries
                    .entry(alloc_id.clone())
                    .or_default()
                    .insert(kind);
            }
        }
    }

    /// Allocation ids missing for one kind
    pub fn missing_for(&self, kind: MetricKind) -> BTreeSet<&str> {
        self.entries
            .iter()
            .filter(|(_, kinds)| kinds.contains(&kind))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Kinds missing for one allocation
    pub fn kinds_for(&self, alloc_id: &str) -> Option<&BTreeSet<MetricKind>> {
        self.entries.get(alloc_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<MetricKind>)> {
        self.entries.iter()
    }

    /// Number of allocations with at least one missing kind
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_gap_is_set_difference() {
        let orchestrator = ids(&["alloc_id1", "alloc_id2", "alloc_id3", "alloc_id4"]);
        let covered = set(&["alloc_id1", "alloc_id2", "stale_alloc"]);

        let mut gaps = GapSet::new();
        gaps.record(MetricKind::ResidentMemory, &orchestrator, &covered);

        let missing: Vec<&str> = gaps
            .missing_for(MetricKind::ResidentMemory)
            .into_iter()
            .collect();
        assert_eq!(missing, vec!["alloc_id3", "alloc_id4"]);
        assert!(gaps.missing_for(MetricKind::PageCache).is_empty());
    }

    #[test]
    fn test_kinds_merge_per_allocation() {
        let orchestrator = ids(&["a", "b"]);

        let mut gaps = GapSet::new();
        gaps.record(MetricKind::CpuTicks, &orchestrator, &set(&["a"]));
        gaps.record(MetricKind::PageCache, &orchestrator, &set(&[]));

        assert_eq!(gaps.len(), 2);
        let a: Vec<MetricKind> = gaps.kinds_for("a").unwrap().iter().copied().collect();
        assert_eq!(a, vec![MetricKind::PageCache]);
        let b: Vec<MetricKind> = gaps.kinds_for("b").unwrap().iter().copied().collect();
        assert_eq!(b, vec![MetricKind::CpuTicks, MetricKind::PageCache]);
    }

    #[test]
    fn test_adding_allocations_changes_gap() {
        let mut orchestrator = ids(&["a", "b"]);
        let mut covered = set(&["a", "b"]);

        let mut gaps = GapSet::new();
        gaps.record(MetricKind::CpuTicks, &orchestrator, &covered);
        assert!(gaps.is_empty());

        orchestrator.push("c".to_string());
        let mut gaps = GapSet::new();
        gaps.record(MetricKind::CpuTicks, &orchestrator, &covered);
        assert_eq!(gaps.missing_for(MetricKind::CpuTicks).len(), 1);

        covered.insert("c".to_string());
        let mut gaps = GapSet::new();
        gaps.record(MetricKind::CpuTicks, &orchestrator, &covered);
        assert!(gaps.is_empty());
    }
}

//! Vector clocks for causal versioning across mesh nodes.
//!
//! Every node owns exactly one counter in the clock and is the only party
//! allowed to advance it. Knowledge about other nodes only ever grows through
//! [`VectorClock::merge`], which takes the pointwise maximum. No operation on
//! this type lowers a counter.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Identifier of a node in the mesh.
pub type NodeId = String;

/// Causal relation between two vector clocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockOrdering {
    /// Every counter of the left clock is <= the right one, and at least one is lower.
    Before,
    /// Every counter of the left clock is >= the right one, and at least one is higher.
    After,
    /// Neither clock dominates the other.
    Concurrent,
    /// Both clocks carry identical counters.
    Equal,
}

impl ClockOrdering {
    /// Ordering seen from the other side of the comparison.
    pub fn reverse(self) -> Self {
        match self {
            ClockOrdering::Before => ClockOrdering::After,
            ClockOrdering::After => ClockOrdering::Before,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClockOrdering::Before => "before",
            ClockOrdering::After => "after",
            ClockOrdering::Concurrent => "concurrent",
            ClockOrdering::Equal => "equal",
        }
    }
}

/// A counter that regressed between two observations of the same clock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Regression {
    pub node: NodeId,
    pub known: u64,
    pub proposed: u64,
}

/// Per-node logical counters establishing a partial causal order.
///
/// Missing entries read as zero, so `{a: 1}` and `{a: 1, b: 0}` compare equal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<NodeId, u64>", into = "BTreeMap<NodeId, u64>")]
pub struct VectorClock {
    entries: BTreeMap<NodeId, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        VectorClock {
            entries: BTreeMap::new(),
        }
    }

    /// Build a clock from `(node, counter)` pairs. Zero counters are dropped.
    pub fn from_entries(entries: impl IntoIterator<Item = (NodeId, u64)>) -> Self {
        VectorClock {
            entries: entries.into_iter().filter(|(_, c)| *c > 0).collect(),
        }
    }

    /// Counter for a node, zero when the node was never observed.
    pub fn get(&self, node: &str) -> u64 {
        self.entries.get(node).copied().unwrap_or(0)
    }

    /// Advance the counter owned by `node` and return the new value.
    ///
    /// Callers must only pass their own node id; peers' counters move
    /// forward exclusively through [`merge`](Self::merge).
    pub fn increment(&mut self, node: impl Into<NodeId>) -> u64 {
        let counter = self.entries.entry(node.into()).or_insert(0);
        *counter = counter.saturating_add(1);
        *counter
    }

    /// Raise a single counter to at least `counter`. Never lowers it.
    pub fn observe(&mut self, node: impl Into<NodeId>, counter: u64) {
        if counter == 0 {
            return;
        }
        let current = self.entries.entry(node.into()).or_insert(0);
        *current = (*current).max(counter);
    }

    /// Pointwise maximum with another clock.
    pub fn merge(&mut self, other: &VectorClock) {
        for (node, &counter) in &other.entries {
            self.observe(node.clone(), counter);
        }
    }

    /// Merged copy, leaving `self` untouched.
    pub fn merged_with(&self, other: &VectorClock) -> VectorClock {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// Compare two clocks counter by counter.
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let mut less = false;
        let mut greater = false;
        for node in self.nodes_with(other) {
            let (a, b) = (self.get(node), other.get(node));
            if a < b {
                less = true;
            } else if a > b {
                greater = true;
            }
            if less && greater {
                return ClockOrdering::Concurrent;
            }
        }
        match (less, greater) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Before,
            (false, true) => ClockOrdering::After,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// True when every counter of `other` is <= the matching counter here.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        other
            .entries
            .iter()
            .all(|(node, &counter)| self.get(node) >= counter)
    }

    pub fn is_concurrent_with(&self, other: &VectorClock) -> bool {
        self.compare(other) == ClockOrdering::Concurrent
    }

    /// Largest absolute counter difference over the union of both node sets.
    pub fn skew(&self, other: &VectorClock) -> u64 {
        self.nodes_with(other)
            .map(|node| self.get(node).abs_diff(other.get(node)))
            .max()
            .unwrap_or(0)
    }

    /// Counters that would move backwards if `proposed` replaced `self`.
    pub fn regressions(&self, proposed: &VectorClock) -> Vec<Regression> {
        self.entries
            .iter()
            .filter_map(|(node, &known)| {
                let value = proposed.get(node);
                (value < known).then(|| Regression {
                    node: node.clone(),
                    known,
                    proposed: value,
                })
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &u64)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all counters.
    pub fn total_operations(&self) -> u64 {
        self.entries.values().fold(0u64, |acc, c| acc.saturating_add(*c))
    }

    /// Plain map view, used by snapshot artifacts.
    pub fn to_map(&self) -> BTreeMap<NodeId, u64> {
        self.entries.clone()
    }

    fn nodes_with<'a>(&'a self, other: &'a VectorClock) -> impl Iterator<Item = &'a str> {
        self.entries
            .keys()
            .chain(other.entries.keys())
            .map(String::as_str)
            .collect::<BTreeSet<_>>()
            .into_iter()
    }
}

impl FromIterator<(NodeId, u64)> for VectorClock {
    fn from_iter<T: IntoIterator<Item = (NodeId, u64)>>(iter: T) -> Self {
        VectorClock::from_entries(iter)
    }
}

impl From<BTreeMap<NodeId, u64>> for VectorClock {
    fn from(entries: BTreeMap<NodeId, u64>) -> Self {
        VectorClock::from_entries(entries)
    }
}

impl From<VectorClock> for BTreeMap<NodeId, u64> {
    fn from(clock: VectorClock) -> Self {
        clock.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(entries: &[(&str, u64)]) -> VectorClock {
        entries.iter().map(|(n, c)| (n.to_string(), *c)).collect()
    }

    #[test]
    fn test_increment_and_get() {
        let mut vc = VectorClock::new();
        assert_eq!(vc.get("a"), 0);
        assert_eq!(vc.increment("a"), 1);
        assert_eq!(vc.increment("a"), 2);
        assert_eq!(vc.get("a"), 2);
        assert_eq!(vc.get("b"), 0);
    }

    #[test]
    fn test_compare() {
        let a = clock(&[("a", 2), ("b", 1)]);
        let b = clock(&[("a", 2), ("b", 3)]);
        let c = clock(&[("a", 3), ("b", 0)]);

        assert_eq!(a.compare(&a), ClockOrdering::Equal);
        assert_eq!(a.compare(&b), ClockOrdering::Before);
        assert_eq!(b.compare(&a), ClockOrdering::After);
        assert_eq!(b.compare(&c), ClockOrdering::Concurrent);
        assert!(b.is_concurrent_with(&c));
    }

    #[test]
    fn test_missing_entries_read_as_zero() {
        let a = clock(&[("a", 1)]);
        let b = clock(&[("a", 1), ("b", 0)]);
        assert_eq!(a.compare(&b), ClockOrdering::Equal);
        assert_eq!(a, b);
    }

    #[test]
    fn test_merge_is_pointwise_max() {
        let a = clock(&[("a", 5), ("b", 3)]);
        let b = clock(&[("a", 3), ("b", 7), ("c", 1)]);
        let merged = a.merged_with(&b);
        assert_eq!(merged.get("a"), 5);
        assert_eq!(merged.get("b"), 7);
        assert_eq!(merged.get("c"), 1);
    }

    #[test]
    fn test_observe_never_lowers() {
        let mut vc = clock(&[("a", 4)]);
        vc.observe("a", 2);
        assert_eq!(vc.get("a"), 4);
        vc.observe("a", 9);
        assert_eq!(vc.get("a"), 9);
    }

    #[test]
    fn test_skew() {
        let a = clock(&[("a", 10), ("b", 2)]);
        let b = clock(&[("a", 4), ("b", 2), ("c", 7)]);
        assert_eq!(a.skew(&b), 7);
        assert_eq!(a.skew(&a), 0);
    }

    #[test]
    fn test_regressions() {
        let known = clock(&[("a", 5), ("b", 3)]);
        let proposed = clock(&[("a", 4), ("b", 8)]);
        let regressions = known.regressions(&proposed);
        assert_eq!(regressions.len(), 1);
        assert_eq!(regressions[0].node, "a");
        assert_eq!(regressions[0].known, 5);
        assert_eq!(regressions[0].proposed, 4);
        assert!(known.regressions(&known.merged_with(&proposed)).is_empty());
    }

    #[test]
    fn test_serialization() {
        let vc = clock(&[("a", 5), ("b", 10)]);
        let json = serde_json::to_string(&vc).unwrap();
        let back: VectorClock = serde_json::from_str(&json).unwrap();
        assert_eq!(vc, back);
    }

    #[test]
    fn test_deserialized_zero_counters_are_dropped() {
        let loaded: VectorClock = serde_json::from_str(r#"{"a":1,"b":0}"#).unwrap();
        assert_eq!(loaded, clock(&[("a", 1)]));
        assert_eq!(loaded.len(), 1);
        assert_eq!(serde_json::to_string(&loaded).unwrap(), r#"{"a":1}"#);
    }
}

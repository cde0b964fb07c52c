//! Bounded retention of snapshots and rollback-target lookup.

use crate::encoder::{StateSnapshot, StateSnapshotEncoder};
use crate::error::{Result, SnapshotError};
use crate::hash::StateHash;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Configuration for snapshot retention and cadence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Maximum time between snapshots, in milliseconds.
    pub interval_ms: u64,

    /// Clock operations since the last snapshot that force a new one.
    pub min_operations_between: u64,

    /// Maximum number of snapshots to retain.
    pub max_snapshots: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig {
            interval_ms: 60_000,
            min_operations_between: 1000,
            max_snapshots: 10,
        }
    }
}

/// Builder for snapshot configuration.
pub struct SnapshotConfigBuilder {
    config: SnapshotConfig,
}

impl SnapshotConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SnapshotConfig::default(),
        }
    }

    pub fn interval_ms(mut self, ms: u64) -> Self {
        self.config.interval_ms = ms;
        self
    }

    pub fn min_operations_between(mut self, ops: u64) -> Self {
        self.config.min_operations_between = ops;
        self
    }

    pub fn max_snapshots(mut self, count: usize) -> Self {
        self.config.max_snapshots = count;
        self
    }

    pub fn build(self) -> SnapshotConfig {
        self.config
    }
}

impl Default for SnapshotConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about retained snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub count: usize,
    pub oldest_timestamp: Option<u64>,
    pub newest_timestamp: Option<u64>,
    pub evicted: u64,
}

/// Retained snapshots, oldest first by timestamp.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SnapshotStore {
    config: SnapshotConfig,
    snapshots: VecDeque<StateSnapshot>,
    #[serde(default)]
    evicted: u64,
}

impl SnapshotStore {
    pub fn new(config: SnapshotConfig) -> Self {
        SnapshotStore {
            config,
            snapshots: VecDeque::new(),
            evicted: 0,
        }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Retain a snapshot, evicting the oldest beyond `max_snapshots`.
    /// Snapshots without a hash are stamped first.
    pub fn store(&mut self, mut snapshot: StateSnapshot) -> Result<StateHash> {
        let hash = match snapshot.hash {
            Some(hash) => hash,
            None => {
                let hash = snapshot.compute_hash()?;
                snapshot.hash = Some(hash);
                hash
            }
        };

        let at = self
            .snapshots
            .partition_point(|s| s.timestamp <= snapshot.timestamp);
        self.snapshots.insert(at, snapshot);

        while self.snapshots.len() > self.config.max_snapshots.max(1) {
            if let Some(old) = self.snapshots.pop_front() {
                debug!(hash = ?old.hash, timestamp = old.timestamp, "snapshot evicted");
                self.evicted += 1;
            }
        }
        Ok(hash)
    }

    /// Capture and retain a snapshot if one is due.
    pub fn capture_if_due(
        &mut self,
        encoder: &StateSnapshotEncoder,
        now: u64,
    ) -> Result<Option<StateHash>> {
        if !self.should_snapshot(encoder.total_operations(), now) {
            return Ok(None);
        }
        let hash = self.store(encoder.create_snapshot()?)?;
        info!(hash = %hash.short(), retained = self.snapshots.len(), "snapshot captured");
        Ok(Some(hash))
    }

    /// Whether enough time or clock activity has passed since the latest snapshot.
    pub fn should_snapshot(&self, total_operations: u64, now: u64) -> bool {
        match self.latest() {
            None => true,
            Some(latest) => {
                let ops_since = total_operations.saturating_sub(latest.total_operations());
                let time_since = now.saturating_sub(latest.timestamp);
                ops_since >= self.config.min_operations_between
                    || time_since >= self.config.interval_ms
            }
        }
    }

    pub fn latest(&self) -> Option<&StateSnapshot> {
        self.snapshots.back()
    }

    pub fn get(&self, hash: &StateHash) -> Option<&StateSnapshot> {
        self.snapshots.iter().rev().find(|s| s.hash.as_ref() == Some(hash))
    }

    /// Most recent snapshot matching `known_good` taken at or before `before`,
    /// the detected corruption time.
    pub fn find_rollback_target(
        &self,
        known_good: &StateHash,
        before: u64,
    ) -> Option<&StateSnapshot> {
        self.snapshots
            .iter()
            .rev()
            .filter(|s| s.timestamp <= before)
            .find(|s| s.hash.as_ref() == Some(known_good))
    }

    /// Like [`find_rollback_target`](Self::find_rollback_target), but an error
    /// when nothing qualifies.
    pub fn require_rollback_target(
        &self,
        known_good: &StateHash,
        before: u64,
    ) -> Result<&StateSnapshot> {
        self.find_rollback_target(known_good, before)
            .ok_or_else(|| SnapshotError::NotFound(known_good.to_hex()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &StateSnapshot> {
        self.snapshots.iter()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn stats(&self) -> SnapshotStats {
        SnapshotStats {
            count: self.snapshots.len(),
            oldest_timestamp: self.snapshots.front().map(|s| s.timestamp),
            newest_timestamp: self.snapshots.back().map(|s| s.timestamp),
            evicted: self.evicted,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a persisted store, verifying every snapshot hash.
    pub fn from_json(json: &str) -> Result<Self> {
        let store: SnapshotStore = serde_json::from_str(json)?;
        for snapshot in &store.snapshots {
            snapshot.verify()?;
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::AgentState;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn snapshot(mood: &str, ops: u64, ts: u64) -> StateSnapshot {
        let agents = vec![AgentState::new("a", json!({"mood": mood}), json!(null))];
        let clocks: BTreeMap<String, u64> = [("a".to_string(), ops)].into_iter().collect();
        StateSnapshot::new(agents, json!({}), clocks, ts).unwrap()
    }

    #[test]
    fn test_retention_is_bounded() {
        let mut store = SnapshotStore::new(SnapshotConfigBuilder::new().max_snapshots(3).build());
        for ts in 0..5 {
            store.store(snapshot("calm", ts, ts * 10)).unwrap();
        }
        let stats = store.stats();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.oldest_timestamp, Some(20));
        assert_eq!(stats.evicted, 2);
    }

    #[test]
    fn test_unhashed_snapshot_is_stamped() {
        let mut store = SnapshotStore::default();
        let mut s = snapshot("calm", 1, 1);
        let expected = s.hash.take().unwrap();
        assert_eq!(store.store(s).unwrap(), expected);
        assert!(store.get(&expected).is_some());
    }

    #[test]
    fn test_cadence() {
        let config = SnapshotConfigBuilder::new()
            .interval_ms(1_000)
            .min_operations_between(10)
            .build();
        let mut store = SnapshotStore::new(config);
        assert!(store.should_snapshot(0, 0));

        store.store(snapshot("calm", 5, 1_000)).unwrap();
        assert!(!store.should_snapshot(8, 1_500));
        assert!(store.should_snapshot(15, 1_500));
        assert!(store.should_snapshot(5, 2_000));
    }

    #[test]
    fn test_capture_skips_encoding_when_not_due() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let reads = Arc::new(AtomicUsize::new(0));
        let agent_reads = reads.clone();
        let encoder = StateSnapshotEncoder::new(
            move || {
                agent_reads.fetch_add(1, Ordering::SeqCst);
                Vec::new()
            },
            || json!({}),
            || [("a".to_string(), u64::MAX), ("b".to_string(), 7)].into_iter().collect(),
        )
        .with_time_source(|| 1_000);
        let config = SnapshotConfigBuilder::new().interval_ms(60_000).build();
        let mut store = SnapshotStore::new(config);

        assert!(store.capture_if_due(&encoder, 1_000).unwrap().is_some());
        assert_eq!(store.latest().unwrap().total_operations(), u64::MAX);
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        assert!(store.capture_if_due(&encoder, 2_000).unwrap().is_none());
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_rollback_target_precedes_corruption() {
        let mut store = SnapshotStore::default();
        let good = store.store(snapshot("calm", 1, 100)).unwrap();
        store.store(snapshot("calm", 1, 200)).unwrap();
        store.store(snapshot("corrupt", 2, 300)).unwrap();
        store.store(snapshot("calm", 1, 400)).unwrap();

        let target = store.find_rollback_target(&good, 350).unwrap();
        assert_eq!(target.timestamp, 200);
        assert!(store.find_rollback_target(&good, 50).is_none());
        assert!(matches!(
            store.require_rollback_target(&good, 50),
            Err(SnapshotError::NotFound(_))
        ));
    }

    #[test]
    fn test_persistence() {
        let mut store = SnapshotStore::default();
        store.store(snapshot("calm", 1, 100)).unwrap();
        let json = store.to_json().unwrap();
        let loaded = SnapshotStore::from_json(&json).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(SnapshotStore::from_json(&json.replace("calm", "angry")).is_err());
    }
}

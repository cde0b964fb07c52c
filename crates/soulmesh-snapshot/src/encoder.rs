//! Snapshot encoding, comparison and diffing.

use crate::canonical::canonical_bytes;
use crate::error::{Result, SnapshotError};
use crate::hash::StateHash;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use soulmesh_core::now_millis;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// One agent's observable state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub id: String,
    #[serde(default)]
    pub memory: Value,
    #[serde(default)]
    pub state: Value,
}

impl AgentState {
    pub fn new(id: impl Into<String>, memory: Value, state: Value) -> Self {
        AgentState {
            id: id.into(),
            memory,
            state,
        }
    }
}

/// A hash-stamped capture of mesh state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub agents: Vec<AgentState>,
    #[serde(default)]
    pub metrics: Value,
    #[serde(default)]
    pub clocks: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<StateHash>,
    pub timestamp: u64,
}

#[derive(Serialize)]
struct HashedContent<'a> {
    agents: Vec<&'a AgentState>,
    metrics: &'a Value,
    clocks: &'a BTreeMap<String, u64>,
}

impl StateSnapshot {
    /// Assemble a snapshot and stamp its hash.
    pub fn new(
        agents: Vec<AgentState>,
        metrics: Value,
        clocks: BTreeMap<String, u64>,
        timestamp: u64,
    ) -> Result<Self> {
        let mut snapshot = StateSnapshot {
            agents,
            metrics,
            clocks,
            hash: None,
            timestamp,
        };
        snapshot.hash = Some(snapshot.compute_hash()?);
        Ok(snapshot)
    }

    /// Canonical content: agents ordered by id, then metrics and clocks.
    /// The timestamp is not part of it.
    pub fn canonical_content(&self) -> Result<Vec<u8>> {
        let mut agents: Vec<&AgentState> = self.agents.iter().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        canonical_bytes(&HashedContent {
            agents,
            metrics: &self.metrics,
            clocks: &self.clocks,
        })
    }

    pub fn compute_hash(&self) -> Result<StateHash> {
        Ok(StateHash::digest(&self.canonical_content()?))
    }

    /// Check the stored hash against the content.
    pub fn verify(&self) -> Result<()> {
        let actual = self.compute_hash()?;
        match self.hash {
            Some(expected) if expected == actual => Ok(()),
            Some(expected) => Err(SnapshotError::HashMismatch {
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            }),
            None => Err(SnapshotError::InvalidData("snapshot has no hash".to_string())),
        }
    }

    /// Sum of every clock counter, saturating at `u64::MAX`.
    pub fn total_operations(&self) -> u64 {
        total_operations(&self.clocks)
    }

    pub fn agent(&self, id: &str) -> Option<&AgentState> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load an artifact, rejecting one whose hash does not match its content.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: StateSnapshot = serde_json::from_str(json)?;
        if snapshot.hash.is_some() {
            snapshot.verify()?;
        }
        Ok(snapshot)
    }
}

/// Differences between two snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDiff {
    /// Agents added, removed or changed, matched by id.
    pub agent_changes: usize,
    /// `after.timestamp - before.timestamp`; negative when `after` is older.
    pub time_delta: i64,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
    /// Nodes whose clock counter differs.
    pub clocks_changed: Vec<String>,
    pub metrics_changed: bool,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.agent_changes == 0 && self.clocks_changed.is_empty() && !self.metrics_changed
    }
}

type Accessor<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Builds snapshots from three live-state accessors.
///
/// The encoder only reads through the accessors, so where agents, metrics
/// and clocks actually live is up to the caller.
pub struct StateSnapshotEncoder {
    agents: Accessor<Vec<AgentState>>,
    metrics: Accessor<Value>,
    clocks: Accessor<BTreeMap<String, u64>>,
    clock: Accessor<u64>,
}

impl StateSnapshotEncoder {
    pub fn new<A, M, C>(agents: A, metrics: M, clocks: C) -> Self
    where
        A: Fn() -> Vec<AgentState> + Send + Sync + 'static,
        M: Fn() -> Value + Send + Sync + 'static,
        C: Fn() -> BTreeMap<String, u64> + Send + Sync + 'static,
    {
        StateSnapshotEncoder {
            agents: Box::new(agents),
            metrics: Box::new(metrics),
            clocks: Box::new(clocks),
            clock: Box::new(now_millis),
        }
    }

    /// Replace the wall clock used for snapshot timestamps.
    pub fn with_time_source(mut self, now: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.clock = Box::new(now);
        self
    }

    /// Operation count across the observed clocks, read without snapshotting.
    pub fn total_operations(&self) -> u64 {
        total_operations(&(self.clocks)())
    }

    pub fn create_snapshot(&self) -> Result<StateSnapshot> {
        let snapshot = StateSnapshot::new(
            (self.agents)(),
            (self.metrics)(),
            (self.clocks)(),
            (self.clock)(),
        )?;
        debug!(
            agents = snapshot.agents.len(),
            hash = ?snapshot.hash,
            "snapshot created"
        );
        Ok(snapshot)
    }

    /// Whether two snapshots capture the same state. Differing hashes decide
    /// immediately; otherwise the canonical content is compared.
    pub fn compare_snapshots(a: &StateSnapshot, b: &StateSnapshot) -> bool {
        if std::ptr::eq(a, b) {
            return true;
        }
        if let (Some(x), Some(y)) = (a.hash, b.hash) {
            if x != y {
                return false;
            }
        }
        match (a.canonical_content(), b.canonical_content()) {
            (Ok(x), Ok(y)) => x == y,
            _ => a == b,
        }
    }

    pub fn get_snapshot_diff(before: &StateSnapshot, after: &StateSnapshot) -> SnapshotDiff {
        let old: BTreeMap<&str, &AgentState> =
            before.agents.iter().map(|a| (a.id.as_str(), a)).collect();
        let new: BTreeMap<&str, &AgentState> =
            after.agents.iter().map(|a| (a.id.as_str(), a)).collect();

        let added: Vec<String> = new
            .keys()
            .filter(|id| !old.contains_key(*id))
            .map(|id| id.to_string())
            .collect();
        let removed: Vec<String> = old
            .keys()
            .filter(|id| !new.contains_key(*id))
            .map(|id| id.to_string())
            .collect();
        let changed: Vec<String> = new
            .iter()
            .filter(|(id, agent)| {
                old.get(*id)
                    .is_some_and(|prev| prev.memory != agent.memory || prev.state != agent.state)
            })
            .map(|(id, _)| id.to_string())
            .collect();

        let nodes: BTreeSet<&String> = before.clocks.keys().chain(after.clocks.keys()).collect();
        let clocks_changed = nodes
            .into_iter()
            .filter(|node| before.clocks.get(*node) != after.clocks.get(*node))
            .cloned()
            .collect();

        SnapshotDiff {
            agent_changes: added.len() + removed.len() + changed.len(),
            time_delta: after.timestamp as i64 - before.timestamp as i64,
            added,
            removed,
            changed,
            clocks_changed,
            metrics_changed: before.metrics != after.metrics,
        }
    }
}

fn total_operations(clocks: &BTreeMap<String, u64>) -> u64 {
    clocks.values().fold(0u64, |acc, c| acc.saturating_add(*c))
}

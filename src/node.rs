//! Composition root.
//!
//! A [`MeshNode`] owns every SoulMesh component and wires them together
//! through one [`EventBus`]: merge gates publish, metrics and the predictor
//! subscribe, and alerts fan out to an in-process feed and a broadcast
//! channel for observers. Snapshots read the gates through accessors.

use crate::config::MeshConfig;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use soulmesh_core::{EmergencePattern, EventBus, NodeId};
use soulmesh_emergence::{broadcast_sink, AlertFeed, EmergencePredictor};
use soulmesh_merge::{MergeError, MergeGate, MergeOutcome};
use soulmesh_metrics::{ConflictResolutionMetrics, MetricsSink, MetricsSnapshot};
use soulmesh_snapshot::{
    AgentState, SnapshotError, SnapshotStore, StateHash, StateSnapshot, StateSnapshotEncoder,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Agent memory: named traces and their strength.
pub type Memory = BTreeMap<String, u64>;

/// Memory key that marks a state as corrupted.
pub const CORRUPT_KEY: &str = "corrupt";

type Gates = Arc<RwLock<BTreeMap<NodeId, MergeGate<Memory>>>>;

/// Errors surfaced by mesh operations.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("agent already joined: {0}")]
    DuplicateAgent(String),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

pub type Result<T> = std::result::Result<T, NodeError>;

/// Concurrent writes keep the stronger trace of each memory.
pub fn reduce_memory(local: &Memory, peer: &Memory) -> Memory {
    let mut merged = local.clone();
    for (key, strength) in peer {
        let entry = merged.entry(key.clone()).or_insert(0);
        *entry = (*entry).max(*strength);
    }
    merged
}

/// Rejects memories carrying the corruption marker.
pub fn validate_memory(memory: &Memory) -> std::result::Result<(), String> {
    if memory.contains_key(CORRUPT_KEY) {
        Err("memory carries a corruption marker".to_string())
    } else {
        Ok(())
    }
}

/// All components of one mesh process.
pub struct MeshNode {
    config: MeshConfig,
    bus: EventBus,
    gates: Gates,
    metrics: Arc<ConflictResolutionMetrics>,
    predictor: Arc<EmergencePredictor>,
    feed: Arc<AlertFeed>,
    alerts: broadcast::Sender<EmergencePattern>,
    encoder: StateSnapshotEncoder,
    snapshots: Mutex<SnapshotStore>,
}

impl MeshNode {
    pub fn new(config: MeshConfig, sink: Arc<dyn MetricsSink>) -> Self {
        let bus = EventBus::new();

        let metrics = Arc::new(ConflictResolutionMetrics::new(sink, config.metrics.clone()));
        metrics.subscribe(&bus);

        let predictor = Arc::new(EmergencePredictor::new(config.predictor.clone()));
        predictor.subscribe(&bus);

        let feed = Arc::new(AlertFeed::new(config.alert_feed_size));
        let (alerts, _) = broadcast::channel(config.alert_channel_capacity.max(1));
        predictor.add_sink(feed.clone());
        predictor.add_sink(Arc::new(broadcast_sink(alerts.clone())));

        let gates: Gates = Arc::new(RwLock::new(BTreeMap::new()));
        let encoder = Self::encoder(&gates, &metrics);

        MeshNode {
            snapshots: Mutex::new(SnapshotStore::new(config.snapshot.clone())),
            config,
            bus,
            gates,
            metrics,
            predictor,
            feed,
            alerts,
            encoder,
        }
    }

    fn encoder(gates: &Gates, metrics: &Arc<ConflictResolutionMetrics>) -> StateSnapshotEncoder {
        let (agents, clocks, metrics) = (gates.clone(), gates.clone(), metrics.clone());
        StateSnapshotEncoder::new(
            move || {
                agents
                    .read()
                    .iter()
                    .map(|(id, gate)| {
                        let memory = serde_json::to_value(gate.state()).unwrap_or_default();
                        let state = json!({
                            "component": gate.component(),
                            "operations": gate.clock().total_operations(),
                            "active_conflicts": gate.conflicts().active_count(),
                        });
                        AgentState::new(id.clone(), memory, state)
                    })
                    .collect()
            },
            move || serde_json::to_value(metrics.get_metrics()).unwrap_or_default(),
            move || {
                clocks
                    .read()
                    .iter()
                    .map(|(id, gate)| (id.clone(), gate.clock().get(id)))
                    .collect()
            },
        )
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.get_metrics()
    }

    pub fn predictor(&self) -> &Arc<EmergencePredictor> {
        &self.predictor
    }

    /// Newest alerts first.
    pub fn recent_alerts(&self) -> Vec<EmergencePattern> {
        self.feed.recent()
    }

    /// A receiver for every alert raised from now on.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<EmergencePattern> {
        self.alerts.subscribe()
    }

    /// Add an agent with an empty memory.
    pub fn join(&self, agent: &str) -> Result<()> {
        let mut gates = self.gates.write();
        if gates.contains_key(agent) {
            return Err(NodeError::DuplicateAgent(agent.to_string()));
        }
        let gate = MergeGate::new(
            agent,
            self.config.component.clone(),
            Memory::new(),
            self.config.merge.clone(),
        )
        .with_reducer(reduce_memory)
        .with_validator(validate_memory)
        .with_bus(self.bus.clone());
        gates.insert(agent.to_string(), gate);
        info!(agent, component = %self.config.component, "agent joined");
        Ok(())
    }

    pub fn agents(&self) -> Vec<NodeId> {
        self.gates.read().keys().cloned().collect()
    }

    /// Record a memory trace on `agent`, advancing its own counter.
    pub fn remember(&self, agent: &str, key: &str, strength: u64) -> Result<u64> {
        let mut gates = self.gates.write();
        let gate = gates
            .get_mut(agent)
            .ok_or_else(|| NodeError::UnknownAgent(agent.to_string()))?;
        let mut memory = gate.state().clone();
        memory.insert(key.to_string(), strength);
        Ok(gate.apply_local(memory))
    }

    pub fn memory(&self, agent: &str) -> Option<Memory> {
        self.gates.read().get(agent).map(|g| g.state().clone())
    }

    /// Deliver `from`'s current version to `to`.
    pub fn sync(&self, from: &str, to: &str) -> Result<MergeOutcome> {
        self.deliver(from, to, |_| {})
    }

    /// Deliver `from`'s version to `to` after letting `tamper` alter it in
    /// transit.
    pub fn deliver<F>(&self, from: &str, to: &str, tamper: F) -> Result<MergeOutcome>
    where
        F: FnOnce(&mut soulmesh_merge::Versioned<Memory>),
    {
        let mut gates = self.gates.write();
        let mut proposal = gates
            .get(from)
            .map(|g| g.current().clone())
            .ok_or_else(|| NodeError::UnknownAgent(from.to_string()))?;
        tamper(&mut proposal);
        let gate = gates
            .get_mut(to)
            .ok_or_else(|| NodeError::UnknownAgent(to.to_string()))?;

        gate.merge(from, proposal).map_err(|e| {
            if let MergeError::RollbackFailure { trace, .. } = &e {
                error!(
                    agent = to,
                    peer = from,
                    reason = %trace.reason,
                    "operator intervention required"
                );
            }
            NodeError::from(e)
        })
    }

    /// Forget every known-good state of `agent`.
    pub fn lose_checkpoints(&self, agent: &str) -> Result<()> {
        let mut gates = self.gates.write();
        gates
            .get_mut(agent)
            .ok_or_else(|| NodeError::UnknownAgent(agent.to_string()))?
            .discard_checkpoints();
        Ok(())
    }

    /// Capture a snapshot now and retain it.
    pub fn snapshot(&self) -> Result<StateSnapshot> {
        let snapshot = self.encoder.create_snapshot()?;
        self.snapshots.lock().store(snapshot.clone())?;
        Ok(snapshot)
    }

    /// Capture a snapshot if the store's cadence says one is due.
    pub fn snapshot_if_due(&self, now: u64) -> Result<Option<StateHash>> {
        Ok(self.snapshots.lock().capture_if_due(&self.encoder, now)?)
    }

    pub fn snapshots(&self) -> SnapshotStore {
        self.snapshots.lock().clone()
    }
}

//! Typed notifications emitted by the protocol layer.
//!
//! Delivery is at-least-once and unordered across nodes, and any field beyond
//! the identifying ones may be missing on the wire. Every payload therefore
//! deserializes with defaults: absent strings become `"unknown"`, absent
//! lists become empty.

use crate::clock::{NodeId, VectorClock};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder used for any string field the sender left out.
pub const UNKNOWN: &str = "unknown";

fn unknown() -> String {
    UNKNOWN.to_string()
}

fn reverted() -> bool {
    true
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Divergence of a component across two or more nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictEvent {
    #[serde(default = "unknown")]
    pub component: String,
    /// Nodes involved, the reporting node first.
    #[serde(default)]
    pub nodes: Vec<NodeId>,
    #[serde(rename = "type", default = "unknown")]
    pub conflict_type: String,
    #[serde(default)]
    pub timestamp: u64,
    /// Clock skew between the divergent branches, when the reporter measured it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skew: Option<u64>,
}

impl ConflictEvent {
    pub fn new(
        component: impl Into<String>,
        nodes: Vec<NodeId>,
        conflict_type: impl Into<String>,
    ) -> Self {
        ConflictEvent {
            component: component.into(),
            nodes,
            conflict_type: conflict_type.into(),
            timestamp: now_millis(),
            skew: None,
        }
    }

    /// Build a vector-clock conflict between two diverged clocks, recording
    /// their counter skew.
    pub fn between_clocks(
        component: impl Into<String>,
        local: (&str, &VectorClock),
        peer: (&str, &VectorClock),
    ) -> Self {
        ConflictEvent::new(
            component,
            vec![local.0.to_string(), peer.0.to_string()],
            "vector_clock",
        )
        .with_skew(local.1.skew(peer.1))
    }

    pub fn with_skew(mut self, skew: u64) -> Self {
        self.skew = Some(skew);
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Node the event is attributed to when windowing per node.
    pub fn reporting_node(&self) -> &str {
        self.nodes.first().map(String::as_str).unwrap_or(UNKNOWN)
    }
}

/// Outcome of an attempt to reconcile a conflict.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionResult {
    #[serde(default = "unknown")]
    pub component: String,
    #[serde(default)]
    pub nodes: Vec<NodeId>,
    #[serde(default = "unknown")]
    pub strategy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_time_ms: Option<f64>,
    #[serde(default)]
    pub successful: bool,
}

/// Record of a state reversion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackTrace {
    #[serde(default = "unknown")]
    pub component: String,
    /// Node whose state was reverted.
    #[serde(default = "unknown")]
    pub node: NodeId,
    #[serde(default = "unknown")]
    pub reason: String,
    /// Only an explicit `false` marks a rollback that had nothing to revert to.
    #[serde(default = "reverted")]
    pub successful: bool,
    #[serde(default)]
    pub timestamp: u64,
    /// Consecutive reversions for the same causal chain, starting at 1.
    #[serde(default)]
    pub depth: u32,
}

/// A node advanced its vector clock for a component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockUpdate {
    #[serde(default = "unknown")]
    pub component: String,
    #[serde(default = "unknown")]
    pub node: NodeId,
}

/// Result of validating a component's state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateValidation {
    #[serde(default = "unknown")]
    pub component: String,
    #[serde(rename = "type", default = "unknown")]
    pub validation_type: String,
    #[serde(default)]
    pub valid: bool,
}

/// A component's state was broadcast to peers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateBroadcast {
    #[serde(default = "unknown")]
    pub component: String,
    #[serde(default)]
    pub target_nodes: Vec<NodeId>,
}

/// Topic names of the six protocol events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ConflictDetected,
    ConflictResolved,
    Rollback,
    VectorClockUpdated,
    StateValidation,
    StateBroadcast,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::ConflictDetected,
        EventKind::ConflictResolved,
        EventKind::Rollback,
        EventKind::VectorClockUpdated,
        EventKind::StateValidation,
        EventKind::StateBroadcast,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ConflictDetected => "conflict_detected",
            EventKind::ConflictResolved => "conflict_resolved",
            EventKind::Rollback => "rollback",
            EventKind::VectorClockUpdated => "vector_clock_updated",
            EventKind::StateValidation => "state_validation",
            EventKind::StateBroadcast => "state_broadcast",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any event the protocol layer can emit.
///
/// On the wire the variant is carried in an `event` field, e.g.
/// `{"event": "conflict_detected", "component": "...", ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MeshEvent {
    ConflictDetected(ConflictEvent),
    ConflictResolved(ResolutionResult),
    Rollback(RollbackTrace),
    VectorClockUpdated(ClockUpdate),
    StateValidation(StateValidation),
    StateBroadcast(StateBroadcast),
}

impl MeshEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MeshEvent::ConflictDetected(_) => EventKind::ConflictDetected,
            MeshEvent::ConflictResolved(_) => EventKind::ConflictResolved,
            MeshEvent::Rollback(_) => EventKind::Rollback,
            MeshEvent::VectorClockUpdated(_) => EventKind::VectorClockUpdated,
            MeshEvent::StateValidation(_) => EventKind::StateValidation,
            MeshEvent::StateBroadcast(_) => EventKind::StateBroadcast,
        }
    }

    pub fn component(&self) -> &str {
        match self {
            MeshEvent::ConflictDetected(e) => &e.component,
            MeshEvent::ConflictResolved(e) => &e.component,
            MeshEvent::Rollback(e) => &e.component,
            MeshEvent::VectorClockUpdated(e) => &e.component,
            MeshEvent::StateValidation(e) => &e.component,
            MeshEvent::StateBroadcast(e) => &e.component,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_event_wire_format() {
        let json = r#"{"event":"conflict_detected","component":"memory.consciousness","nodes":["a","b"],"type":"vector_clock"}"#;
        let event: MeshEvent = serde_json::from_str(json).unwrap();
        match event {
            MeshEvent::ConflictDetected(conflict) => {
                assert_eq!(conflict.component, "memory.consciousness");
                assert_eq!(conflict.nodes, vec!["a", "b"]);
                assert_eq!(conflict.conflict_type, "vector_clock");
                assert_eq!(conflict.reporting_node(), "a");
                assert_eq!(conflict.skew, None);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_missing_fields_default() {
        let event: MeshEvent =
            serde_json::from_str(r#"{"event":"conflict_resolved","component":"c"}"#).unwrap();
        let MeshEvent::ConflictResolved(result) = event else {
            panic!("wrong variant");
        };
        assert_eq!(result.strategy, UNKNOWN);
        assert!(result.nodes.is_empty());
        assert_eq!(result.resolution_time_ms, None);
        assert!(!result.successful);

        let event: MeshEvent = serde_json::from_str(r#"{"event":"rollback"}"#).unwrap();
        assert_eq!(event.component(), UNKNOWN);
        assert_eq!(event.kind(), EventKind::Rollback);
    }

    #[test]
    fn test_rollback_success_only_cleared_explicitly() {
        let sparse: RollbackTrace = serde_json::from_str(r#"{"node":"a","depth":1}"#).unwrap();
        assert!(sparse.successful);

        let failed: RollbackTrace =
            serde_json::from_str(r#"{"node":"a","depth":1,"successful":false}"#).unwrap();
        assert!(!failed.successful);
    }

    #[test]
    fn test_reporting_node_without_nodes() {
        let event = ConflictEvent::new("c", vec![], "vector_clock");
        assert_eq!(event.reporting_node(), UNKNOWN);
    }

    #[test]
    fn test_between_clocks_records_skew() {
        let local = VectorClock::from_entries([("a".to_string(), 2500)]);
        let peer = VectorClock::from_entries([("a".to_string(), 500), ("b".to_string(), 3)]);
        let event = ConflictEvent::between_clocks("c", ("a", &local), ("b", &peer));
        assert_eq!(event.skew, Some(2000));
        assert_eq!(event.nodes, vec!["a", "b"]);
    }

    #[test]
    fn test_event_kind_names() {
        let names: Vec<_> = EventKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(
            names,
            [
                "conflict_detected",
                "conflict_resolved",
                "rollback",
                "vector_clock_updated",
                "state_validation",
                "state_broadcast"
            ]
        );
    }
}

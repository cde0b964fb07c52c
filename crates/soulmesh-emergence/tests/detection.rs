//! End-to-end detection over the event bus.
//!
//! These tests verify:
//! - The `memory.consciousness` burst yields exactly one cascade
//! - Reordered, redelivered and sparse events still complete their patterns
//! - Alerts reach a broadcast observer as JSON-ready patterns
//! - Window memory stays bounded under sustained load

use proptest::prelude::*;
use soulmesh_core::{EmergencePattern, EventBus, MeshEvent, PatternType, Severity};
use soulmesh_emergence::{broadcast_sink, AlertFeed, EmergencePredictor, PredictorConfig};
use std::sync::Arc;
use tokio::sync::broadcast;

fn wired() -> (Arc<EmergencePredictor>, Arc<AlertFeed>, EventBus) {
    let predictor = Arc::new(EmergencePredictor::default());
    let feed = Arc::new(AlertFeed::default());
    predictor.add_sink(feed.clone());
    let bus = EventBus::new();
    predictor.subscribe(&bus);
    (predictor, feed, bus)
}

fn event(json: &str) -> MeshEvent {
    serde_json::from_str(json).unwrap()
}

#[test]
fn consciousness_burst_yields_one_cascade() {
    let (_, feed, bus) = wired();
    let burst = r#"{"event":"conflict_detected","component":"memory.consciousness","nodes":["a","b"],"type":"vector_clock"}"#;
    for _ in 0..3 {
        bus.emit(event(burst));
    }

    let alerts = feed.recent();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].pattern_type, PatternType::ConflictCascade);
    assert_eq!(alerts[0].severity, Severity::High);

    bus.emit(event(burst));
    assert_eq!(feed.len(), 1);
}

#[test]
fn rollback_depths_from_the_wire() {
    let (_, feed, bus) = wired();
    bus.emit(event(r#"{"event":"rollback","node":"a","successful":true,"depth":2,"timestamp":1}"#));
    bus.emit(event(r#"{"event":"rollback","node":"a","successful":true,"depth":1,"timestamp":2}"#));
    assert!(feed.is_empty());

    bus.emit(event(r#"{"event":"rollback","node":"a","successful":true,"depth":2,"timestamp":3}"#));
    assert_eq!(feed.latest().unwrap().pattern_type, PatternType::RollbackChain);
}

#[test]
fn reordered_burst_yields_one_cascade() {
    let (_, feed, bus) = wired();
    for ts in [5_000, 5_100, 1_000] {
        bus.emit(event(&format!(
            r#"{{"event":"conflict_detected","component":"memory","nodes":["a","b"],"timestamp":{ts}}}"#
        )));
    }
    assert_eq!(feed.len(), 1);
    assert_eq!(feed.latest().unwrap().pattern_type, PatternType::ConflictCascade);
}

#[test]
fn sparse_rollbacks_chain_without_escalating() {
    let (predictor, feed, bus) = wired();
    bus.emit(event(r#"{"event":"rollback","node":"a","depth":1}"#));
    bus.emit(event(r#"{"event":"rollback","node":"a","depth":2}"#));

    let alerts = feed.recent();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].pattern_type, PatternType::RollbackChain);
    assert_eq!(alerts[0].severity, Severity::High);
    assert_eq!(predictor.stats().rollbacks_seen, 2);
}

#[test]
fn explicit_rollback_failure_escalates() {
    let (_, feed, bus) = wired();
    bus.emit(event(r#"{"event":"rollback","node":"a","depth":1,"successful":false}"#));
    let alert = feed.latest().unwrap();
    assert_eq!(alert.severity, Severity::Critical);
    assert_eq!(alert.metadata["requires_operator"], true);
}

#[test]
fn ignored_topics_are_not_subscribed() {
    let (predictor, feed, bus) = wired();
    bus.emit(event(r#"{"event":"state_broadcast","component":"x"}"#));
    assert!(feed.is_empty());
    assert_eq!(predictor.stats().conflicts_seen, 0);
}

#[tokio::test]
async fn divergence_reaches_broadcast_observer() {
    let (tx, mut rx) = broadcast::channel(16);
    let predictor = EmergencePredictor::default();
    predictor.add_sink(Arc::new(broadcast_sink(tx)));

    predictor.handle(&event(
        r#"{"event":"conflict_detected","component":"c","nodes":["a","b"],"type":"vector_clock","skew":2000}"#,
    ));

    let alert: EmergencePattern = rx.recv().await.unwrap();
    let json = serde_json::to_value(&alert).unwrap();
    assert_eq!(json["type"], "VectorClockDivergence");
    assert_eq!(json["severity"], "critical");
    assert_eq!(json["metadata"]["skew"], 2000);
}

proptest! {
    #[test]
    fn windows_stay_bounded(nodes in prop::collection::vec(0u16..500, 1..400)) {
        let config = PredictorConfig {
            max_tracked_nodes: 16,
            window_capacity: 4,
            ..PredictorConfig::default()
        };
        let predictor = EmergencePredictor::new(config);
        for (i, n) in nodes.iter().enumerate() {
            let e = soulmesh_core::ConflictEvent::new("c", vec![format!("n{n}")], "vector_clock")
                .with_timestamp(1 + i as u64);
            predictor.handle_conflict(&e);
        }
        prop_assert!(predictor.stats().tracked_nodes <= 16);
    }
}

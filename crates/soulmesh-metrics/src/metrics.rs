//! Aggregation of conflict, resolution and rollback measurements.
//!
//! [`ConflictResolutionMetrics`] consumes the six protocol events, keeps
//! in-memory aggregates, and forwards every measurement to an injected
//! [`MetricsSink`]. Events may arrive more than once and in any order;
//! nothing here fails on a partial payload.

use crate::history::{MetricHistory, Sample};
use crate::sink::{MetricDescriptor, MetricKind, MetricsSink, Tags};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use soulmesh_core::{
    now_millis, ClockUpdate, ConflictEvent, EventBus, EventKind, MeshEvent, ResolutionResult,
    RollbackTrace, StateBroadcast, StateValidation, SubscriptionId,
};
use std::sync::Arc;
use tracing::{debug, warn};

pub const CONFLICTS_DETECTED: &str = "soulmesh_conflicts_detected_total";
pub const CONFLICTS_RESOLVED: &str = "soulmesh_conflicts_resolved_total";
pub const RESOLUTION_FAILURES: &str = "soulmesh_resolution_failures_total";
pub const RESOLUTION_TIME: &str = "soulmesh_resolution_time_ms";
pub const ROLLBACKS: &str = "soulmesh_rollbacks_total";
pub const ROLLBACK_DEPTH: &str = "soulmesh_rollback_depth";
pub const ACTIVE_CONFLICTS: &str = "soulmesh_active_conflicts";
pub const CLOCK_UPDATES: &str = "soulmesh_vector_clock_updates_total";
pub const STATE_VALIDATIONS: &str = "soulmesh_state_validations_total";
pub const STATE_BROADCASTS: &str = "soulmesh_state_broadcasts_total";
pub const BROADCAST_TARGETS: &str = "soulmesh_broadcast_targets";

/// Configuration for metrics aggregation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Keep a bounded history of every measurement.
    pub track_history: bool,
    /// Samples retained per measurement when history is enabled.
    pub history_size: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            track_history: false,
            history_size: 1000,
        }
    }
}

/// Builder for metrics configuration.
pub struct MetricsConfigBuilder {
    config: MetricsConfig,
}

impl MetricsConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: MetricsConfig::default(),
        }
    }

    pub fn track_history(mut self, enabled: bool) -> Self {
        self.config.track_history = enabled;
        self
    }

    pub fn history_size(mut self, size: usize) -> Self {
        self.config.history_size = size;
        self
    }

    pub fn build(self) -> MetricsConfig {
        self.config
    }
}

impl Default for MetricsConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic event counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub detected: u64,
    pub resolved: u64,
    pub rollbacks: u64,
    pub resolution_failures: u64,
    pub failed_rollbacks: u64,
    pub clock_updates: u64,
    pub validations: u64,
    pub invalid_states: u64,
    pub broadcasts: u64,
}

/// Point-in-time view returned by [`ConflictResolutionMetrics::get_metrics`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub counters: Counters,
    /// `detected - resolved - rollbacks`, floored at zero.
    pub active_conflicts: u64,
    /// Running mean over resolutions that reported a duration.
    pub avg_resolution_time: f64,
    pub timed_resolutions: u64,
    pub timestamp: u64,
}

#[derive(Debug, Default)]
struct Aggregates {
    counters: Counters,
    avg_resolution_time: f64,
    timed_resolutions: u64,
}

impl Aggregates {
    fn active_conflicts(&self) -> u64 {
        let closed = self.counters.resolved.saturating_add(self.counters.rollbacks);
        self.counters.detected.saturating_sub(closed)
    }
}

/// Metrics aggregator for conflict handling across the mesh.
pub struct ConflictResolutionMetrics {
    sink: Arc<dyn MetricsSink>,
    config: MetricsConfig,
    state: Mutex<Aggregates>,
    history: Option<Mutex<MetricHistory>>,
}

impl ConflictResolutionMetrics {
    /// Create the aggregator and register its descriptors with the sink.
    /// Registration failures are logged; the aggregator still works.
    pub fn new(sink: Arc<dyn MetricsSink>, config: MetricsConfig) -> Self {
        let history = config
            .track_history
            .then(|| Mutex::new(MetricHistory::new(config.history_size)));
        let metrics = ConflictResolutionMetrics {
            sink,
            config,
            state: Mutex::new(Aggregates::default()),
            history,
        };
        for descriptor in Self::descriptors() {
            if let Err(e) = metrics.sink.register_metric(&descriptor) {
                warn!(metric = %descriptor.name, error = %e, "failed to register metric");
            }
        }
        metrics
    }

    /// Every metric this aggregator records.
    pub fn descriptors() -> Vec<MetricDescriptor> {
        use MetricKind::{Counter, Gauge, Histogram};
        vec![
            MetricDescriptor::new(CONFLICTS_DETECTED, Counter)
                .with_help("Conflicts detected between nodes")
                .with_tags(&["component", "type"]),
            MetricDescriptor::new(CONFLICTS_RESOLVED, Counter)
                .with_help("Conflicts successfully resolved")
                .with_tags(&["component", "strategy"]),
            MetricDescriptor::new(RESOLUTION_FAILURES, Counter)
                .with_help("Resolution attempts that did not succeed")
                .with_tags(&["component", "strategy"]),
            MetricDescriptor::new(RESOLUTION_TIME, Histogram)
                .with_help("Time spent resolving a conflict")
                .with_tags(&["component", "strategy"]),
            MetricDescriptor::new(ROLLBACKS, Counter)
                .with_help("State rollbacks")
                .with_tags(&["component", "reason", "successful"]),
            MetricDescriptor::new(ROLLBACK_DEPTH, Histogram)
                .with_help("Consecutive rollback depth")
                .with_tags(&["component"]),
            MetricDescriptor::new(ACTIVE_CONFLICTS, Gauge).with_help("Conflicts not yet closed"),
            MetricDescriptor::new(CLOCK_UPDATES, Counter)
                .with_help("Vector clock advances")
                .with_tags(&["component", "node"]),
            MetricDescriptor::new(STATE_VALIDATIONS, Counter)
                .with_help("State validations performed")
                .with_tags(&["component", "type", "valid"]),
            MetricDescriptor::new(STATE_BROADCASTS, Counter)
                .with_help("State broadcasts")
                .with_tags(&["component"]),
            MetricDescriptor::new(BROADCAST_TARGETS, Histogram)
                .with_help("Target nodes per broadcast")
                .with_tags(&["component"]),
        ]
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Register handlers for the six protocol topics on `bus`.
    pub fn subscribe(self: &Arc<Self>, bus: &EventBus) -> Vec<SubscriptionId> {
        EventKind::ALL
            .iter()
            .map(|topic| {
                let metrics = Arc::clone(self);
                bus.subscribe(*topic, move |event| metrics.handle(event))
            })
            .collect()
    }

    /// Dispatch any protocol event.
    pub fn handle(&self, event: &MeshEvent) {
        match event {
            MeshEvent::ConflictDetected(e) => self.on_conflict_detected(e),
            MeshEvent::ConflictResolved(e) => self.on_conflict_resolved(e),
            MeshEvent::Rollback(e) => self.on_rollback(e),
            MeshEvent::VectorClockUpdated(e) => self.on_clock_updated(e),
            MeshEvent::StateValidation(e) => self.on_state_validation(e),
            MeshEvent::StateBroadcast(e) => self.on_state_broadcast(e),
        }
    }

    pub fn on_conflict_detected(&self, event: &ConflictEvent) {
        let active = {
            let mut state = self.state.lock();
            state.counters.detected += 1;
            state.active_conflicts()
        };
        self.emit(
            CONFLICTS_DETECTED,
            1.0,
            tags(&[("component", &event.component), ("type", &event.conflict_type)]),
        );
        self.emit(ACTIVE_CONFLICTS, active as f64, Tags::new());
    }

    pub fn on_conflict_resolved(&self, result: &ResolutionResult) {
        let active = {
            let mut state = self.state.lock();
            state.counters.resolved += 1;
            if !result.successful {
                state.counters.resolution_failures += 1;
            }
            if let Some(ms) = result.resolution_time_ms.filter(|ms| ms.is_finite()) {
                state.timed_resolutions += 1;
                let n = state.timed_resolutions as f64;
                state.avg_resolution_time += (ms - state.avg_resolution_time) / n;
            }
            state.active_conflicts()
        };

        let tags = tags(&[("component", &result.component), ("strategy", &result.strategy)]);
        if result.successful {
            self.emit(CONFLICTS_RESOLVED, 1.0, tags.clone());
        } else {
            self.emit(RESOLUTION_FAILURES, 1.0, tags.clone());
        }
        if let Some(ms) = result.resolution_time_ms {
            self.emit(RESOLUTION_TIME, ms, tags);
        }
        self.emit(ACTIVE_CONFLICTS, active as f64, Tags::new());
    }

    pub fn on_rollback(&self, trace: &RollbackTrace) {
        let active = {
            let mut state = self.state.lock();
            state.counters.rollbacks += 1;
            if !trace.successful {
                state.counters.failed_rollbacks += 1;
            }
            state.active_conflicts()
        };
        let successful = trace.successful.to_string();
        self.emit(
            ROLLBACKS,
            1.0,
            tags(&[
                ("component", &trace.component),
                ("reason", &trace.reason),
                ("successful", &successful),
            ]),
        );
        self.emit(
            ROLLBACK_DEPTH,
            f64::from(trace.depth),
            tags(&[("component", &trace.component)]),
        );
        self.emit(ACTIVE_CONFLICTS, active as f64, Tags::new());
    }

    pub fn on_clock_updated(&self, update: &ClockUpdate) {
        self.state.lock().counters.clock_updates += 1;
        self.emit(
            CLOCK_UPDATES,
            1.0,
            tags(&[("component", &update.component), ("node", &update.node)]),
        );
    }

    pub fn on_state_validation(&self, validation: &StateValidation) {
        {
            let mut state = self.state.lock();
            state.counters.validations += 1;
            if !validation.valid {
                state.counters.invalid_states += 1;
            }
        }
        let valid = validation.valid.to_string();
        self.emit(
            STATE_VALIDATIONS,
            1.0,
            tags(&[
                ("component", &validation.component),
                ("type", &validation.validation_type),
                ("valid", &valid),
            ]),
        );
    }

    pub fn on_state_broadcast(&self, broadcast: &StateBroadcast) {
        self.state.lock().counters.broadcasts += 1;
        let tags = tags(&[("component", &broadcast.component)]);
        self.emit(STATE_BROADCASTS, 1.0, tags.clone());
        self.emit(BROADCAST_TARGETS, broadcast.target_nodes.len() as f64, tags);
    }

    /// Consistent snapshot of all aggregates.
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        MetricsSnapshot {
            counters: state.counters.clone(),
            active_conflicts: state.active_conflicts(),
            avg_resolution_time: state.avg_resolution_time,
            timed_resolutions: state.timed_resolutions,
            timestamp: now_millis(),
        }
    }

    /// Retained samples for one measurement; empty when history is off.
    pub fn history(&self, name: &str) -> Vec<Sample> {
        self.history
            .as_ref()
            .map(|h| h.lock().samples(name))
            .unwrap_or_default()
    }

    /// Slope of a measurement in units per second, if history is on.
    pub fn trend(&self, name: &str) -> Option<f64> {
        self.history.as_ref().and_then(|h| h.lock().trend(name))
    }

    fn emit(&self, name: &str, value: f64, tags: Tags) {
        if let Some(history) = &self.history {
            history.lock().record(name, now_millis(), value);
        }
        if let Err(e) = self.sink.record(name, value, &tags) {
            warn!(metric = name, error = %e, "metrics sink rejected a value");
        } else {
            debug!(metric = name, value, "recorded");
        }
    }
}

fn tags(pairs: &[(&str, &String)]) -> Tags {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MemorySink, NoopSink, SinkError};

    fn metrics() -> (Arc<MemorySink>, ConflictResolutionMetrics) {
        let sink = Arc::new(MemorySink::new());
        let metrics = ConflictResolutionMetrics::new(sink.clone(), MetricsConfig::default());
        (sink, metrics)
    }

    fn detected() -> MeshEvent {
        MeshEvent::ConflictDetected(ConflictEvent::new(
            "memory.consciousness",
            vec!["a".into(), "b".into()],
            "vector_clock",
        ))
    }

    fn resolved(ms: Option<f64>) -> MeshEvent {
        MeshEvent::ConflictResolved(ResolutionResult {
            component: "memory.consciousness".into(),
            nodes: vec!["a".into(), "b".into()],
            strategy: "vector_clock_merge".into(),
            resolution_time_ms: ms,
            successful: true,
        })
    }

    #[test]
    fn test_registers_all_descriptors() {
        let (sink, _) = metrics();
        for d in ConflictResolutionMetrics::descriptors() {
            assert_eq!(sink.descriptor(&d.name).unwrap().kind, d.kind);
        }
    }

    #[test]
    fn test_detected_counter_and_active_gauge() {
        let (sink, metrics) = metrics();
        for _ in 0..3 {
            metrics.handle(&detected());
        }
        metrics.handle(&resolved(Some(10.0)));

        let snapshot = metrics.get_metrics();
        assert_eq!(snapshot.counters.detected, 3);
        assert_eq!(snapshot.counters.resolved, 1);
        assert_eq!(snapshot.active_conflicts, 2);
        assert_eq!(sink.total(CONFLICTS_DETECTED), 3.0);
        assert_eq!(sink.records_for(ACTIVE_CONFLICTS).last().unwrap().value, 2.0);
    }

    #[test]
    fn test_active_conflicts_never_negative() {
        let (_, metrics) = metrics();
        metrics.handle(&resolved(None));
        metrics.handle(&MeshEvent::Rollback(RollbackTrace {
            component: "c".into(),
            node: "a".into(),
            reason: "r".into(),
            successful: true,
            timestamp: 0,
            depth: 1,
        }));
        assert_eq!(metrics.get_metrics().active_conflicts, 0);
        metrics.handle(&detected());
        assert_eq!(metrics.get_metrics().active_conflicts, 0);
    }

    #[test]
    fn test_running_mean() {
        let (_, metrics) = metrics();
        metrics.handle(&resolved(Some(10.0)));
        metrics.handle(&resolved(Some(20.0)));
        metrics.handle(&resolved(None));
        metrics.handle(&resolved(Some(30.0)));
        let snapshot = metrics.get_metrics();
        assert_eq!(snapshot.counters.resolved, 4);
        assert_eq!(snapshot.timed_resolutions, 3);
        assert!((snapshot.avg_resolution_time - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_resolution_is_counted() {
        let (_, metrics) = metrics();
        let event: MeshEvent =
            serde_json::from_str(r#"{"event":"conflict_resolved","component":"c","successful":true}"#)
                .unwrap();
        metrics.handle(&event);
        let snapshot = metrics.get_metrics();
        assert_eq!(snapshot.counters.resolved, 1);
        assert_eq!(snapshot.avg_resolution_time, 0.0);
    }

    #[test]
    fn test_other_events() {
        let (sink, metrics) = metrics();
        metrics.handle(&MeshEvent::StateValidation(StateValidation {
            component: "c".into(),
            validation_type: "merge".into(),
            valid: false,
        }));
        metrics.handle(&MeshEvent::StateBroadcast(StateBroadcast {
            component: "c".into(),
            target_nodes: vec!["a".into(), "b".into(), "c".into()],
        }));
        metrics.handle(&MeshEvent::VectorClockUpdated(ClockUpdate {
            component: "c".into(),
            node: "a".into(),
        }));

        let counters = metrics.get_metrics().counters;
        assert_eq!(counters.validations, 1);
        assert_eq!(counters.invalid_states, 1);
        assert_eq!(counters.broadcasts, 1);
        assert_eq!(counters.clock_updates, 1);
        assert_eq!(sink.total(BROADCAST_TARGETS), 3.0);
    }

    struct FailingSink;

    impl MetricsSink for FailingSink {
        fn register_metric(&self, _: &MetricDescriptor) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("down".into()))
        }

        fn record(&self, _: &str, _: f64, _: &Tags) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("down".into()))
        }
    }

    #[test]
    fn test_sink_failures_do_not_interrupt_ingestion() {
        let metrics =
            ConflictResolutionMetrics::new(Arc::new(FailingSink), MetricsConfig::default());
        metrics.handle(&detected());
        metrics.handle(&detected());
        assert_eq!(metrics.get_metrics().counters.detected, 2);
    }

    #[test]
    fn test_history_tracking() {
        let config = MetricsConfigBuilder::new()
            .track_history(true)
            .history_size(2)
            .build();
        let tracked = ConflictResolutionMetrics::new(Arc::new(NoopSink), config);
        for _ in 0..5 {
            tracked.handle(&detected());
        }
        assert_eq!(tracked.history(CONFLICTS_DETECTED).len(), 2);
        assert_eq!(tracked.history(ACTIVE_CONFLICTS).last().unwrap().value, 5.0);

        let (_, untracked) = metrics();
        untracked.handle(&detected());
        assert!(untracked.history(CONFLICTS_DETECTED).is_empty());
    }

    #[test]
    fn test_bus_subscription() {
        let (_, metrics) = metrics();
        let metrics = Arc::new(metrics);
        let bus = EventBus::new();
        metrics.subscribe(&bus);
        bus.emit(detected());
        bus.emit(resolved(Some(5.0)));
        let snapshot = metrics.get_metrics();
        assert_eq!(snapshot.counters.detected, 1);
        assert_eq!(snapshot.counters.resolved, 1);
        assert_eq!(snapshot.active_conflicts, 0);
    }
}

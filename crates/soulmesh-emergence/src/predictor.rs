//! Online detection of systemic instability.
//!
//! [`EmergencePredictor`] watches conflict and rollback events and raises
//! three kinds of [`EmergencePattern`]:
//!
//! - `ConflictCascade`: a node reports `cascade_threshold` conflicts within
//!   `window_ms`. The node's window is consumed when the alert fires, so one
//!   burst yields one alert.
//! - `VectorClockDivergence`: a single conflict whose skew exceeds
//!   `divergence_threshold`. Fires immediately, regardless of windows.
//! - `RollbackChain`: a node rolls back `chain_threshold` times in a row with
//!   strictly increasing depth. A depth that does not increase restarts the
//!   chain. A failed rollback still joins the chain, then escalates to a
//!   critical alert.
//!
//! Alerts are handed to every registered [`AlertSink`] after the window lock
//! has been released.

use crate::sink::AlertSink;
use crate::window::WindowArena;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use soulmesh_core::{
    clamp_unit, now_millis, ConflictEvent, EmergencePattern, EventBus, EventKind, MeshEvent,
    PatternType, RollbackTrace, Scorer, Severity, SubscriptionId,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Configuration for pattern detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// Length of the cascade window in milliseconds.
    pub window_ms: u64,
    /// Conflicts from one node within the window that make a cascade.
    pub cascade_threshold: usize,
    /// Skew above which a single conflict is a divergence.
    pub divergence_threshold: u64,
    /// Consecutive increasing-depth rollbacks that make a chain.
    pub chain_threshold: usize,
    /// Slots per ring buffer.
    pub window_capacity: usize,
    /// Nodes tracked before the least recently seen is evicted.
    pub max_tracked_nodes: usize,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        PredictorConfig {
            window_ms: 60_000,
            cascade_threshold: 3,
            divergence_threshold: 1000,
            chain_threshold: 2,
            window_capacity: 32,
            max_tracked_nodes: 1024,
        }
    }
}

/// Builder for predictor configuration.
pub struct PredictorConfigBuilder {
    config: PredictorConfig,
}

impl PredictorConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PredictorConfig::default(),
        }
    }

    pub fn window_ms(mut self, ms: u64) -> Self {
        self.config.window_ms = ms;
        self
    }

    pub fn cascade_threshold(mut self, count: usize) -> Self {
        self.config.cascade_threshold = count;
        self
    }

    pub fn divergence_threshold(mut self, skew: u64) -> Self {
        self.config.divergence_threshold = skew;
        self
    }

    pub fn chain_threshold(mut self, count: usize) -> Self {
        self.config.chain_threshold = count;
        self
    }

    pub fn window_capacity(mut self, slots: usize) -> Self {
        self.config.window_capacity = slots;
        self
    }

    pub fn max_tracked_nodes(mut self, count: usize) -> Self {
        self.config.max_tracked_nodes = count;
        self
    }

    pub fn build(self) -> PredictorConfig {
        self.config
    }
}

impl Default for PredictorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Confidence that a conflict reflects real divergence, from how far its
/// skew overshoots the threshold. No skew scores zero.
#[derive(Clone, Copy, Debug)]
pub struct SkewRatioScorer {
    pub threshold: u64,
}

impl Scorer<ConflictEvent> for SkewRatioScorer {
    fn score(&self, event: &ConflictEvent) -> f64 {
        match event.skew {
            Some(skew) if skew > 0 => clamp_unit(1.0 - self.threshold as f64 / skew as f64),
            _ => 0.0,
        }
    }
}

/// Counters describing predictor activity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictorStats {
    pub conflicts_seen: u64,
    pub rollbacks_seen: u64,
    pub alerts_raised: u64,
    pub sink_failures: u64,
    pub tracked_nodes: usize,
    pub evicted_nodes: u64,
}

struct Inner {
    windows: WindowArena,
    stats: PredictorStats,
}

/// Sliding-window pattern detector over conflict and rollback events.
pub struct EmergencePredictor {
    config: PredictorConfig,
    inner: Mutex<Inner>,
    sinks: RwLock<Vec<Arc<dyn AlertSink>>>,
    scorer: Box<dyn Scorer<ConflictEvent>>,
}

impl EmergencePredictor {
    pub fn new(config: PredictorConfig) -> Self {
        let scorer = SkewRatioScorer {
            threshold: config.divergence_threshold,
        };
        Self::with_scorer(config, scorer)
    }

    pub fn with_scorer(
        config: PredictorConfig,
        scorer: impl Scorer<ConflictEvent> + 'static,
    ) -> Self {
        let capacity = config
            .window_capacity
            .max(config.cascade_threshold)
            .max(config.chain_threshold);
        EmergencePredictor {
            inner: Mutex::new(Inner {
                windows: WindowArena::new(capacity, config.max_tracked_nodes),
                stats: PredictorStats::default(),
            }),
            config,
            sinks: RwLock::new(Vec::new()),
            scorer: Box::new(scorer),
        }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Register a destination for raised alerts.
    pub fn add_sink(&self, sink: Arc<dyn AlertSink>) {
        self.sinks.write().push(sink);
    }

    /// Forward conflict and rollback events from `bus`.
    pub fn subscribe(self: &Arc<Self>, bus: &EventBus) -> Vec<SubscriptionId> {
        [EventKind::ConflictDetected, EventKind::Rollback]
            .into_iter()
            .map(|topic| {
                let predictor = Arc::clone(self);
                bus.subscribe(topic, move |event| {
                    predictor.handle(event);
                })
            })
            .collect()
    }

    /// Dispatch any protocol event; kinds the predictor ignores yield nothing.
    pub fn handle(&self, event: &MeshEvent) -> Vec<EmergencePattern> {
        match event {
            MeshEvent::ConflictDetected(e) => self.handle_conflict(e),
            MeshEvent::Rollback(t) => self.handle_rollback(t),
            _ => Vec::new(),
        }
    }

    /// Feed one conflict. Returns the alerts it raised.
    pub fn handle_conflict(&self, event: &ConflictEvent) -> Vec<EmergencePattern> {
        let mut raised = Vec::new();
        let ts = event_time(event.timestamp);

        if let Some(skew) = event.skew.filter(|&s| s > self.config.divergence_threshold) {
            raised.push(
                EmergencePattern::new(PatternType::VectorClockDivergence, Severity::Critical, ts)
                    .with_metadata("component", event.component.clone())
                    .with_metadata("nodes", event.nodes.clone())
                    .with_metadata("skew", skew)
                    .with_metadata("threshold", self.config.divergence_threshold)
                    .with_metadata("confidence", self.scorer.score(event)),
            );
        }

        {
            let mut inner = self.inner.lock();
            inner.stats.conflicts_seen += 1;
            inner.windows.record_kind(EventKind::ConflictDetected, ts);

            let node = event.reporting_node();
            let window = inner.windows.slot_mut(node);
            // Delivery is unordered: the window ends at the newest conflict seen.
            let anchor = window.conflicts.newest().map_or(ts, |newest| newest.max(ts));
            let from = anchor.saturating_sub(self.config.window_ms);
            window.conflicts.prune_before(from);
            if ts >= from {
                window.conflicts.push(ts);
            } else {
                debug!(node, ts, from, "conflict older than window dropped");
            }
            let count = window.conflicts.count_between(from, anchor);

            if count >= self.config.cascade_threshold {
                window.conflicts.clear();
                let mesh_wide = inner.windows.kind_count(EventKind::ConflictDetected, from, anchor);
                let confidence = clamp_unit(count as f64 / self.config.cascade_threshold as f64);
                raised.push(
                    EmergencePattern::new(PatternType::ConflictCascade, Severity::High, ts)
                        .with_metadata("node", node)
                        .with_metadata("component", event.component.clone())
                        .with_metadata("conflicts", count)
                        .with_metadata("window_ms", self.config.window_ms)
                        .with_metadata("mesh_conflicts", mesh_wide)
                        .with_metadata("confidence", confidence),
                );
            } else {
                debug!(node, count, "conflict recorded");
            }
            inner.stats.alerts_raised += raised.len() as u64;
        }

        self.emit(&raised);
        raised
    }

    /// Feed one rollback. Returns the alerts it raised.
    ///
    /// A failed rollback still extends the node's chain before it escalates.
    pub fn handle_rollback(&self, trace: &RollbackTrace) -> Vec<EmergencePattern> {
        let ts = event_time(trace.timestamp);
        let mut raised = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.stats.rollbacks_seen += 1;
            inner.windows.record_kind(EventKind::Rollback, ts);

            let chain = &mut inner.windows.slot_mut(&trace.node).rollback_chain;
            if chain.back().is_some_and(|&last| trace.depth <= last) {
                chain.clear();
            }
            chain.push(trace.depth);

            if chain.len() >= self.config.chain_threshold {
                let depths: Vec<u32> = chain.iter().copied().collect();
                chain.clear();
                raised.push(
                    EmergencePattern::new(PatternType::RollbackChain, Severity::High, ts)
                        .with_metadata("node", trace.node.clone())
                        .with_metadata("component", trace.component.clone())
                        .with_metadata("depths", depths)
                        .with_metadata("reason", trace.reason.clone()),
                );
            }
            if !trace.successful {
                chain.clear();
                raised.push(failure_alert(trace, ts));
            }
            inner.stats.alerts_raised += raised.len() as u64;
        }

        self.emit(&raised);
        raised
    }

    /// Raise a critical alert for a rollback that had nothing to revert to.
    pub fn escalate_rollback_failure(&self, trace: &RollbackTrace) -> Vec<EmergencePattern> {
        let ts = event_time(trace.timestamp);
        {
            let mut inner = self.inner.lock();
            inner.stats.rollbacks_seen += 1;
            inner.stats.alerts_raised += 1;
            let chained = inner
                .windows
                .get(&trace.node)
                .map_or(0, |w| w.rollback_chain.len());
            if chained > 0 {
                debug!(node = %trace.node, chained, "chain superseded by failure");
                inner.windows.slot_mut(&trace.node).rollback_chain.clear();
            }
        }
        let raised = vec![failure_alert(trace, ts)];
        self.emit(&raised);
        raised
    }

    pub fn stats(&self) -> PredictorStats {
        let inner = self.inner.lock();
        PredictorStats {
            tracked_nodes: inner.windows.tracked_nodes(),
            evicted_nodes: inner.windows.evictions(),
            ..inner.stats.clone()
        }
    }

    fn emit(&self, patterns: &[EmergencePattern]) {
        if patterns.is_empty() {
            return;
        }
        let sinks = self.sinks.read().clone();
        let mut failures = 0;
        for pattern in patterns {
            info!(
                pattern = %pattern.pattern_type,
                severity = %pattern.severity,
                "emergence pattern detected"
            );
            for sink in &sinks {
                if let Err(e) = sink.send(pattern) {
                    warn!(pattern = %pattern.pattern_type, error = %e, "alert delivery failed");
                    failures += 1;
                }
            }
        }
        if failures > 0 {
            self.inner.lock().stats.sink_failures += failures;
        }
    }
}

impl Default for EmergencePredictor {
    fn default() -> Self {
        Self::new(PredictorConfig::default())
    }
}

fn failure_alert(trace: &RollbackTrace, ts: u64) -> EmergencePattern {
    EmergencePattern::new(PatternType::RollbackChain, Severity::Critical, ts)
        .with_metadata("node", trace.node.clone())
        .with_metadata("component", trace.component.clone())
        .with_metadata("reason", trace.reason.clone())
        .with_metadata("depth", trace.depth)
        .with_metadata("requires_operator", true)
}

fn event_time(timestamp: u64) -> u64 {
    if timestamp == 0 {
        now_millis()
    } else {
        timestamp
    }
}

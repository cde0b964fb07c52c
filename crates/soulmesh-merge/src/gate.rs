//! The merge-safety gate.
//!
//! A [`MergeGate`] owns one component's replicated state on one node. Peer
//! proposals pass through it before they touch local state:
//!
//! 1. **Causal validation.** A proposal is rejected when any counter in the
//!    peer's clock is lower than in the last clock already accepted from that
//!    peer, or when the peer claims more updates from this node than this node
//!    ever made. Either would force a non-monotonic change of local knowledge.
//! 2. **Ordering.** Equal and stale proposals leave state untouched, causally
//!    newer ones fast-forward, concurrent ones open a conflict and go through
//!    the configured [`ResolutionStrategy`].
//! 3. **State validation.** The candidate state is offered to the injected
//!    [`StateValidator`] before it is committed.
//!
//! Any failure triggers `rollback_unsafe_state`, which restores the latest
//! known-good checkpoint. Only a rollback with no checkpoint left surfaces as
//! an error ([`MergeError::RollbackFailure`]).

use crate::conflict::{ConflictPhase, ConflictTracker};
use crate::error::{MergeError, Result, ValidationFailure};
use crate::skew::{Skew, SkewBasis};
use crate::strategy::{
    timestamp_priority, Arbiter, ResolutionStrategy, StateReducer, StateValidator, Versioned,
};
use soulmesh_core::{
    now_millis, ClockOrdering, ClockUpdate, ConflictEvent, EventBus, MeshEvent, NodeId,
    ResolutionResult, RollbackTrace, StateValidation, VectorClock,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Configuration for a merge gate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Strategy used for concurrent updates.
    pub strategy: ResolutionStrategy,
    /// Known-good states retained for rollback. Zero disables rollback.
    pub max_checkpoints: usize,
    /// Closed conflict instances kept for inspection.
    pub max_closed_conflicts: usize,
    /// Distance reported as the skew of detected conflicts.
    pub skew_basis: SkewBasis,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            strategy: ResolutionStrategy::default(),
            max_checkpoints: 8,
            max_closed_conflicts: 64,
            skew_basis: SkewBasis::default(),
        }
    }
}

/// Builder for merge configuration.
pub struct MergeConfigBuilder {
    config: MergeConfig,
}

impl MergeConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: MergeConfig::default(),
        }
    }

    pub fn strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn max_checkpoints(mut self, count: usize) -> Self {
        self.config.max_checkpoints = count;
        self
    }

    pub fn max_closed_conflicts(mut self, count: usize) -> Self {
        self.config.max_closed_conflicts = count;
        self
    }

    pub fn skew_basis(mut self, basis: SkewBasis) -> Self {
        self.config.skew_basis = basis;
        self
    }

    pub fn build(self) -> MergeConfig {
        self.config
    }
}

impl Default for MergeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// What a call to [`MergeGate::merge`] did.
#[derive(Clone, Debug, PartialEq)]
pub enum MergeOutcome {
    /// The proposal carried exactly the local clock.
    Unchanged,
    /// The proposal was causally older; local state already contains it.
    Stale,
    /// The proposal was causally newer and replaced local state.
    FastForward,
    /// A concurrent update was reconciled.
    Resolved(ResolutionResult),
    /// The proposal was unsafe and local state was restored.
    RolledBack {
        trace: RollbackTrace,
        failure: ValidationFailure,
    },
}

impl MergeOutcome {
    pub fn is_commit(&self) -> bool {
        matches!(self, MergeOutcome::FastForward | MergeOutcome::Resolved(_))
    }
}

/// Causally-gated replica of one component's state.
pub struct MergeGate<S> {
    node_id: NodeId,
    component: String,
    config: MergeConfig,
    local: Versioned<S>,
    checkpoints: VecDeque<Versioned<S>>,
    /// Last clock accepted from each peer.
    peer_frontiers: HashMap<NodeId, VectorClock>,
    /// Consecutive rollbacks per peer since its last accepted proposal.
    rollback_depth: HashMap<NodeId, u32>,
    conflicts: ConflictTracker,
    reducer: Option<Box<dyn StateReducer<S>>>,
    arbiter: Option<Box<dyn Arbiter<S>>>,
    validator: Option<Box<dyn StateValidator<S>>>,
    bus: Option<EventBus>,
}

impl<S: Clone> MergeGate<S> {
    /// Bootstrap a gate. The initial state is the first known-good checkpoint.
    pub fn new(
        node_id: impl Into<NodeId>,
        component: impl Into<String>,
        initial: S,
        config: MergeConfig,
    ) -> Self {
        let node_id = node_id.into();
        let local = Versioned::new(initial, VectorClock::new(), now_millis(), node_id.clone());
        let mut gate = MergeGate {
            node_id,
            component: component.into(),
            conflicts: ConflictTracker::new(config.max_closed_conflicts),
            config,
            local,
            checkpoints: VecDeque::new(),
            peer_frontiers: HashMap::new(),
            rollback_depth: HashMap::new(),
            reducer: None,
            arbiter: None,
            validator: None,
            bus: None,
        };
        gate.checkpoint();
        gate
    }

    pub fn with_reducer(mut self, reducer: impl StateReducer<S> + 'static) -> Self {
        self.reducer = Some(Box::new(reducer));
        self
    }

    pub fn with_arbiter(mut self, arbiter: impl Arbiter<S> + 'static) -> Self {
        self.arbiter = Some(Box::new(arbiter));
        self
    }

    pub fn with_validator(mut self, validator: impl StateValidator<S> + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Publish protocol events for every gate decision on `bus`.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn state(&self) -> &S {
        &self.local.value
    }

    pub fn clock(&self) -> &VectorClock {
        &self.local.clock
    }

    /// Current version, as broadcast to peers.
    pub fn current(&self) -> &Versioned<S> {
        &self.local
    }

    pub fn conflicts(&self) -> &ConflictTracker {
        &self.conflicts
    }

    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.len()
    }

    /// Drop all known-good states, e.g. after they were found corrupted.
    /// The next rollback fails until a new commit lands.
    pub fn discard_checkpoints(&mut self) {
        warn!(node = %self.node_id, component = %self.component, "discarding all checkpoints");
        self.checkpoints.clear();
    }

    /// Apply a local mutation: advance this node's own counter and commit.
    pub fn apply_local(&mut self, value: S) -> u64 {
        let counter = self.local.clock.increment(self.node_id.clone());
        self.local.value = value;
        self.local.wall_clock_ms = now_millis().max(self.local.wall_clock_ms);
        self.local.origin = self.node_id.clone();
        self.checkpoint();
        debug!(node = %self.node_id, component = %self.component, counter, "local_commit");
        self.publish_clock_update();
        counter
    }

    /// Check a peer clock against local knowledge without touching state.
    pub fn validate(
        &self,
        peer_id: &str,
        clock: &VectorClock,
    ) -> std::result::Result<(), ValidationFailure> {
        if let Some(known) = self.peer_frontiers.get(peer_id) {
            if let Some(r) = known.regressions(clock).into_iter().next() {
                return Err(ValidationFailure::CausalRegression {
                    peer: peer_id.to_string(),
                    node: r.node,
                    known: r.known,
                    proposed: r.proposed,
                });
            }
        }

        let local = self.local.clock.get(&self.node_id);
        let proposed = clock.get(&self.node_id);
        if proposed > local {
            return Err(ValidationFailure::FutureCounter {
                peer: peer_id.to_string(),
                node: self.node_id.clone(),
                local,
                proposed,
            });
        }
        Ok(())
    }

    /// Offer a peer's proposed version to the gate.
    pub fn merge(&mut self, peer_id: &str, proposal: Versioned<S>) -> Result<MergeOutcome> {
        if let Err(failure) = self.validate(peer_id, &proposal.clock) {
            return self.rollback_unsafe_state(peer_id, failure);
        }

        match self.local.clock.compare(&proposal.clock) {
            ClockOrdering::Equal => {
                self.accept_frontier(peer_id, &proposal.clock);
                Ok(MergeOutcome::Unchanged)
            }
            ClockOrdering::After => {
                debug!(node = %self.node_id, peer = peer_id, "stale proposal ignored");
                self.accept_frontier(peer_id, &proposal.clock);
                Ok(MergeOutcome::Stale)
            }
            ClockOrdering::Before => {
                if let Err(failure) = self.check_state(&proposal.value) {
                    return self.rollback_unsafe_state(peer_id, failure);
                }
                self.commit(peer_id, proposal.value, &proposal.clock, proposal.wall_clock_ms);
                Ok(MergeOutcome::FastForward)
            }
            ClockOrdering::Concurrent => self.resolve_concurrent(peer_id, proposal),
        }
    }

    fn resolve_concurrent(
        &mut self,
        peer_id: &str,
        proposal: Versioned<S>,
    ) -> Result<MergeOutcome> {
        let started = Instant::now();
        let nodes = vec![self.node_id.clone(), peer_id.to_string()];
        let skew = Skew::between(&self.local, &proposal);

        let id = self.conflicts.open(&self.component, nodes.clone());
        info!(
            node = %self.node_id,
            peer = peer_id,
            component = %self.component,
            conflict = %id,
            skew = skew.counter,
            "conflict_detected"
        );
        self.publish(MeshEvent::ConflictDetected(ConflictEvent {
            component: self.component.clone(),
            nodes: nodes.clone(),
            conflict_type: "vector_clock".to_string(),
            timestamp: now_millis(),
            skew: Some(skew.value(self.config.skew_basis)),
        }));
        self.conflicts.advance(&self.component, ConflictPhase::Resolving)?;

        let candidate = self.apply_strategy(&proposal).and_then(|value| {
            self.check_state(&value)?;
            Ok(value)
        });

        let value = match candidate {
            Ok(value) => value,
            Err(failure) => return self.rollback_unsafe_state(peer_id, failure),
        };

        let wall = proposal.wall_clock_ms.max(self.local.wall_clock_ms);
        self.commit(peer_id, value, &proposal.clock, wall);
        self.conflicts.advance(&self.component, ConflictPhase::Resolved)?;

        let result = ResolutionResult {
            component: self.component.clone(),
            nodes,
            strategy: self.config.strategy.as_str().to_string(),
            resolution_time_ms: Some(started.elapsed().as_secs_f64() * 1000.0),
            successful: true,
        };
        self.publish(MeshEvent::ConflictResolved(result.clone()));
        Ok(MergeOutcome::Resolved(result))
    }

    fn apply_strategy(&self, proposal: &Versioned<S>) -> std::result::Result<S, ValidationFailure> {
        match self.config.strategy {
            ResolutionStrategy::TimestampPriority => {
                Ok(timestamp_priority(&self.local, proposal).value.clone())
            }
            ResolutionStrategy::VectorClockMerge => self
                .reducer
                .as_ref()
                .map(|r| r.reduce(&self.local.value, &proposal.value))
                .ok_or_else(|| {
                    ValidationFailure::Unresolvable("no state reducer configured".into())
                }),
            ResolutionStrategy::Arbitration => match &self.arbiter {
                Some(arbiter) => arbiter
                    .arbitrate(&self.component, &self.local, proposal)
                    .ok_or_else(|| ValidationFailure::Unresolvable("arbiter declined".into())),
                None => Err(ValidationFailure::Unresolvable("no arbiter configured".into())),
            },
        }
    }

    fn check_state(&self, value: &S) -> std::result::Result<(), ValidationFailure> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        let verdict = validator.validate(value);
        self.publish(MeshEvent::StateValidation(StateValidation {
            component: self.component.clone(),
            validation_type: "merge".to_string(),
            valid: verdict.is_ok(),
        }));
        verdict.map_err(ValidationFailure::InvalidState)
    }

    fn commit(&mut self, peer_id: &str, value: S, peer_clock: &VectorClock, wall_clock_ms: u64) {
        self.local.value = value;
        self.local.clock.merge(peer_clock);
        self.local.wall_clock_ms = wall_clock_ms.max(self.local.wall_clock_ms);
        self.local.origin = self.node_id.clone();
        self.accept_frontier(peer_id, peer_clock);
        self.checkpoint();
        info!(
            node = %self.node_id,
            peer = peer_id,
            component = %self.component,
            operations = self.local.clock.total_operations(),
            "merge_commit"
        );
        self.publish_clock_update();
    }

    /// Restore the latest known-good checkpoint after an unsafe proposal.
    fn rollback_unsafe_state(
        &mut self,
        peer_id: &str,
        failure: ValidationFailure,
    ) -> Result<MergeOutcome> {
        let depth = {
            let depth = self.rollback_depth.entry(peer_id.to_string()).or_insert(0);
            *depth = depth.saturating_add(1);
            *depth
        };

        // A rollback ends any conflict that was being resolved.
        if let Some(instance) = self.conflicts.active(&self.component) {
            if instance.phase == ConflictPhase::Resolving {
                self.conflicts.advance(&self.component, ConflictPhase::RolledBack)?;
            }
        }

        let target = self.checkpoints.back().cloned();
        let mut trace = RollbackTrace {
            component: self.component.clone(),
            node: self.node_id.clone(),
            reason: failure.reason().to_string(),
            successful: target.is_some(),
            timestamp: now_millis(),
            depth,
        };

        let Some(target) = target else {
            trace.reason = format!("{}: no_known_good_state", failure.reason());
            error!(
                node = %self.node_id,
                peer = peer_id,
                component = %self.component,
                depth,
                %failure,
                "rollback_failed"
            );
            self.publish(MeshEvent::Rollback(trace.clone()));
            return Err(MergeError::RollbackFailure {
                trace,
                cause: failure,
            });
        };

        // Counters stay put: the restored value keeps the current clock.
        self.local.value = target.value;
        self.local.clock.merge(&target.clock);
        warn!(
            node = %self.node_id,
            peer = peer_id,
            component = %self.component,
            depth,
            %failure,
            "merge_rollback"
        );
        self.publish(MeshEvent::Rollback(trace.clone()));
        Ok(MergeOutcome::RolledBack { trace, failure })
    }

    fn accept_frontier(&mut self, peer_id: &str, clock: &VectorClock) {
        self.peer_frontiers
            .entry(peer_id.to_string())
            .or_default()
            .merge(clock);
        self.rollback_depth.remove(peer_id);
    }

    fn checkpoint(&mut self) {
        if self.config.max_checkpoints == 0 {
            return;
        }
        while self.checkpoints.len() >= self.config.max_checkpoints {
            self.checkpoints.pop_front();
        }
        self.checkpoints.push_back(self.local.clone());
    }

    fn publish_clock_update(&self) {
        self.publish(MeshEvent::VectorClockUpdated(ClockUpdate {
            component: self.component.clone(),
            node: self.node_id.clone(),
        }));
    }

    fn publish(&self, event: MeshEvent) {
        if let Some(bus) = &self.bus {
            bus.emit(event);
        }
    }
}

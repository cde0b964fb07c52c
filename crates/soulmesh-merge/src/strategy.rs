//! Conflict resolution strategies.
//!
//! A strategy only runs for concurrent updates; causally ordered updates are
//! fast-forwarded by the gate. The resolved value always travels with the
//! pointwise maximum of both clocks.

use serde::{Deserialize, Serialize};
use soulmesh_core::{NodeId, Scorer, VectorClock};
use std::fmt;

/// A value together with the causal metadata it was produced under.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Versioned<S> {
    pub value: S,
    pub clock: VectorClock,
    /// Wall-clock milliseconds of the last write.
    pub wall_clock_ms: u64,
    /// Node that produced this version.
    pub origin: NodeId,
}

impl<S> Versioned<S> {
    pub fn new(
        value: S,
        clock: VectorClock,
        wall_clock_ms: u64,
        origin: impl Into<NodeId>,
    ) -> Self {
        Versioned {
            value,
            clock,
            wall_clock_ms,
            origin: origin.into(),
        }
    }
}

/// How concurrent updates are reconciled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Last writer wins on wall-clock time, ties broken by node id.
    TimestampPriority,
    /// Pointwise clock max plus an application-defined state reducer.
    #[default]
    VectorClockMerge,
    /// Delegate to an external arbitration hook.
    Arbitration,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::TimestampPriority => "timestamp_priority",
            ResolutionStrategy::VectorClockMerge => "vector_clock_merge",
            ResolutionStrategy::Arbitration => "arbitration",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combines two concurrent states into one. Should be commutative so that
/// every node converges on the same value.
pub trait StateReducer<S>: Send + Sync {
    fn reduce(&self, local: &S, peer: &S) -> S;
}

impl<S, F> StateReducer<S> for F
where
    F: Fn(&S, &S) -> S + Send + Sync,
{
    fn reduce(&self, local: &S, peer: &S) -> S {
        self(local, peer)
    }
}

/// Hook for concurrent updates no built-in rule can settle.
/// Returning `None` leaves the conflict unresolved, which rolls it back.
pub trait Arbiter<S>: Send + Sync {
    fn arbitrate(&self, component: &str, local: &Versioned<S>, peer: &Versioned<S>) -> Option<S>;
}

impl<S, F> Arbiter<S> for F
where
    F: Fn(&str, &Versioned<S>, &Versioned<S>) -> Option<S> + Send + Sync,
{
    fn arbitrate(&self, component: &str, local: &Versioned<S>, peer: &Versioned<S>) -> Option<S> {
        self(component, local, peer)
    }
}

/// Arbiter that keeps whichever side a [`Scorer`] rates higher.
/// Scores closer than `margin` are treated as a tie and left unresolved.
pub struct ScoredArbiter<Sc> {
    scorer: Sc,
    margin: f64,
}

impl<Sc> ScoredArbiter<Sc> {
    pub fn new(scorer: Sc, margin: f64) -> Self {
        ScoredArbiter {
            scorer,
            margin: margin.max(0.0),
        }
    }
}

impl<S: Clone, Sc: Scorer<S>> Arbiter<S> for ScoredArbiter<Sc> {
    fn arbitrate(&self, _component: &str, local: &Versioned<S>, peer: &Versioned<S>) -> Option<S> {
        let l = self.scorer.score(&local.value);
        let p = self.scorer.score(&peer.value);
        if (l - p).abs() <= self.margin {
            None
        } else if l > p {
            Some(local.value.clone())
        } else {
            Some(peer.value.clone())
        }
    }
}

/// Accepts or rejects a state before it is committed.
pub trait StateValidator<S>: Send + Sync {
    fn validate(&self, state: &S) -> Result<(), String>;
}

impl<S, F> StateValidator<S> for F
where
    F: Fn(&S) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, state: &S) -> Result<(), String> {
        self(state)
    }
}

/// Last-writer-wins pick between two versions.
pub fn timestamp_priority<'a, S>(
    local: &'a Versioned<S>,
    peer: &'a Versioned<S>,
) -> &'a Versioned<S> {
    match peer.wall_clock_ms.cmp(&local.wall_clock_ms) {
        std::cmp::Ordering::Greater => peer,
        std::cmp::Ordering::Less => local,
        std::cmp::Ordering::Equal if peer.origin > local.origin => peer,
        std::cmp::Ordering::Equal => local,
    }
}

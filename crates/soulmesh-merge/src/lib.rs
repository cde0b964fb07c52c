//! # soulmesh-merge
//!
//! Merge-safety gating for SoulMesh peer updates.
//!
//! This crate provides:
//! - [`MergeGate`]: validates peer proposals against causal knowledge,
//!   resolves concurrent updates, and rolls back unsafe ones
//! - Resolution strategies: timestamp priority, vector-clock merge with a
//!   state reducer, and an arbitration hook
//! - Conflict lifecycle: `DETECTED -> RESOLVING -> {RESOLVED | ROLLED_BACK}`
//! - Skew measurement between divergent branches
//!
//! ## Example
//!
//! ```rust
//! use soulmesh_merge::{MergeConfig, MergeGate, MergeOutcome};
//!
//! let mut a = MergeGate::new("a", "memory", 0u64, MergeConfig::default())
//!     .with_reducer(|x: &u64, y: &u64| *x.max(y));
//! let mut b = MergeGate::new("b", "memory", 0u64, MergeConfig::default())
//!     .with_reducer(|x: &u64, y: &u64| *x.max(y));
//!
//! a.apply_local(3);
//! b.apply_local(5);
//!
//! let outcome = a.merge("b", b.current().clone()).unwrap();
//! assert!(matches!(outcome, MergeOutcome::Resolved(_)));
//! assert_eq!(*a.state(), 5);
//! ```

mod conflict;
mod error;
mod gate;
mod skew;
mod strategy;

pub use conflict::{ConflictInstance, ConflictPhase, ConflictTracker};
pub use error::{MergeError, Result, ValidationFailure};
pub use gate::{MergeConfig, MergeConfigBuilder, MergeGate, MergeOutcome};
pub use skew::{Skew, SkewBasis};
pub use strategy::{
    timestamp_priority, Arbiter, ResolutionStrategy, ScoredArbiter, StateReducer, StateValidator,
    Versioned,
};

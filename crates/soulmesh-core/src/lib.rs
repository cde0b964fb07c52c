//! # soulmesh-core
//!
//! Shared vocabulary of the SoulMesh conflict layer.
//!
//! This crate provides:
//! - Vector clocks: per-node causal counters with pointwise-max merge
//! - Mesh events: the six typed notifications emitted by the protocol layer
//! - Event bus: explicit publish/subscribe used instead of global listeners
//! - Emergence patterns: the alert type raised by the predictor
//! - Scorers: pluggable `[0, 1]` judgements
//!
//! ## Example
//!
//! ```rust
//! use soulmesh_core::{ClockOrdering, EventBus, EventKind, VectorClock};
//!
//! let mut a = VectorClock::new();
//! let mut b = VectorClock::new();
//! a.increment("node-a");
//! b.increment("node-b");
//! assert_eq!(a.compare(&b), ClockOrdering::Concurrent);
//!
//! let bus = EventBus::new();
//! bus.subscribe(EventKind::ConflictDetected, |event| println!("{:?}", event));
//! ```

pub mod bus;
pub mod clock;
pub mod events;
pub mod pattern;
pub mod score;

pub use bus::{EventBus, EventHandler, SubscriptionId};
pub use clock::{ClockOrdering, NodeId, Regression, VectorClock};
pub use events::{
    now_millis, ClockUpdate, ConflictEvent, EventKind, MeshEvent, ResolutionResult,
    RollbackTrace, StateBroadcast, StateValidation, UNKNOWN,
};
pub use pattern::{EmergencePattern, PatternType, Severity};
pub use score::{clamp_unit, Scorer};

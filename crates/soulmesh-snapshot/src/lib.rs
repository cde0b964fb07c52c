//! # soulmesh-snapshot
//!
//! Hash-stamped captures of mesh state for audit and rollback targeting.
//!
//! This crate provides:
//! - [`StateSnapshotEncoder`]: builds snapshots from three injected accessors
//! - Deterministic hashing: SHA-256 over key-order-independent JSON
//! - Comparison and per-agent diffs between snapshots
//! - [`SnapshotStore`]: bounded retention, cadence and rollback-target lookup
//!
//! ## Example
//!
//! ```rust
//! use soulmesh_snapshot::{AgentState, StateSnapshotEncoder};
//! use serde_json::json;
//! use std::collections::BTreeMap;
//!
//! let encoder = StateSnapshotEncoder::new(
//!     || vec![AgentState::new("a", json!({}), json!("idle"))],
//!     || json!({"detected": 0}),
//!     BTreeMap::new,
//! );
//! let before = encoder.create_snapshot().unwrap();
//! let after = encoder.create_snapshot().unwrap();
//! assert!(StateSnapshotEncoder::compare_snapshots(&before, &after));
//! ```

mod canonical;
mod encoder;
mod error;
mod hash;
mod store;

pub use canonical::canonical_bytes;
pub use encoder::{AgentState, SnapshotDiff, StateSnapshot, StateSnapshotEncoder};
pub use error::{Result, SnapshotError};
pub use hash::StateHash;
pub use store::{SnapshotConfig, SnapshotConfigBuilder, SnapshotStats, SnapshotStore};

//! # soulmesh-metrics
//!
//! Conflict, resolution and rollback measurements for SoulMesh.
//!
//! [`ConflictResolutionMetrics`] subscribes to the protocol events, keeps
//! counters and a running mean of resolution time, and forwards every
//! measurement to a [`MetricsSink`]. Sink failures are logged and never
//! interrupt ingestion.
//!
//! ## Example
//!
//! ```rust
//! use soulmesh_core::{ConflictEvent, EventBus, MeshEvent};
//! use soulmesh_metrics::{ConflictResolutionMetrics, MemorySink, MetricsConfig};
//! use std::sync::Arc;
//!
//! let metrics = Arc::new(ConflictResolutionMetrics::new(
//!     Arc::new(MemorySink::new()),
//!     MetricsConfig::default(),
//! ));
//! let bus = EventBus::new();
//! metrics.subscribe(&bus);
//!
//! bus.emit(MeshEvent::ConflictDetected(ConflictEvent::new(
//!     "memory",
//!     vec!["a".into(), "b".into()],
//!     "vector_clock",
//! )));
//! assert_eq!(metrics.get_metrics().active_conflicts, 1);
//! ```

mod history;
mod metrics;
mod sink;

pub use history::{MetricHistory, Sample};
pub use metrics::{
    ConflictResolutionMetrics, Counters, MetricsConfig, MetricsConfigBuilder, MetricsSnapshot,
    ACTIVE_CONFLICTS, BROADCAST_TARGETS, CLOCK_UPDATES, CONFLICTS_DETECTED, CONFLICTS_RESOLVED,
    RESOLUTION_FAILURES, RESOLUTION_TIME, ROLLBACKS, ROLLBACK_DEPTH, STATE_BROADCASTS,
    STATE_VALIDATIONS,
};
pub use sink::{
    MemorySink, MetricDescriptor, MetricKind, MetricsSink, NoopSink, Recorded, SinkError, Tags,
};

//! # soulmesh-emergence
//!
//! Online detection of cascading instability in a SoulMesh.
//!
//! This crate provides:
//! - [`EmergencePredictor`]: raises `ConflictCascade`, `VectorClockDivergence`
//!   and `RollbackChain` alerts from the live event stream
//! - Bounded windows: fixed-capacity [`RingBuffer`]s in a [`WindowArena`]
//! - Alert delivery: the [`AlertSink`] trait, a tokio broadcast adapter and
//!   an [`AlertFeed`] of the newest alerts
//!
//! ## Example
//!
//! ```rust
//! use soulmesh_core::{ConflictEvent, PatternType};
//! use soulmesh_emergence::{AlertFeed, EmergencePredictor};
//! use std::sync::Arc;
//!
//! let predictor = EmergencePredictor::default();
//! let feed = Arc::new(AlertFeed::default());
//! predictor.add_sink(feed.clone());
//!
//! let event = ConflictEvent::new("memory", vec!["a".into(), "b".into()], "vector_clock");
//! for _ in 0..3 {
//!     predictor.handle_conflict(&event);
//! }
//! assert_eq!(feed.latest().unwrap().pattern_type, PatternType::ConflictCascade);
//! ```

mod predictor;
mod sink;
mod window;

pub use predictor::{
    EmergencePredictor, PredictorConfig, PredictorConfigBuilder, PredictorStats, SkewRatioScorer,
};
pub use sink::{broadcast_sink, AlertError, AlertFeed, AlertSink, BroadcastSink, DEFAULT_FEED_SIZE};
pub use window::{NodeWindow, RingBuffer, WindowArena};

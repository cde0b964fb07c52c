//! Higher-order anomaly alerts inferred from the event stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Kind of systemic instability an alert describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternType {
    /// Repeated conflicts from one node within a short window.
    ConflictCascade,
    /// A single conflict whose clock skew exceeds the divergence threshold.
    VectorClockDivergence,
    /// Consecutive rollbacks of increasing depth, or a rollback with nothing to revert to.
    RollbackChain,
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PatternType::ConflictCascade => "ConflictCascade",
            PatternType::VectorClockDivergence => "VectorClockDivergence",
            PatternType::RollbackChain => "RollbackChain",
        };
        f.write_str(name)
    }
}

/// Alert severity, ordered from least to most urgent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// An emergence alert pushed to observers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmergencePattern {
    #[serde(rename = "type")]
    pub pattern_type: PatternType,
    pub timestamp: u64,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl EmergencePattern {
    pub fn new(pattern_type: PatternType, severity: Severity, timestamp: u64) -> Self {
        EmergencePattern {
            pattern_type,
            timestamp,
            severity,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

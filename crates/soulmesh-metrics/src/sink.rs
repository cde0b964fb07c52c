//! Outbound metrics sink contract.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Tag set attached to a recorded value.
pub type Tags = BTreeMap<String, String>;

/// Errors reported by a metrics sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("metric not registered: {0}")]
    Unregistered(String),

    #[error("metric already registered with a different kind: {0}")]
    KindMismatch(String),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Kind of measurement a metric name carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// Declaration of a metric, registered once before any value is recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDescriptor {
    pub name: String,
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    /// Tag keys this metric is recorded with.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl MetricDescriptor {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        MetricDescriptor {
            name: name.into(),
            kind,
            help: None,
            tags: Vec::new(),
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }
}

/// Destination for recorded measurements (Prometheus bridge, OTLP exporter, ...).
pub trait MetricsSink: Send + Sync {
    fn register_metric(&self, descriptor: &MetricDescriptor) -> Result<(), SinkError>;

    fn record(&self, name: &str, value: f64, tags: &Tags) -> Result<(), SinkError>;
}

/// Sink that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn register_metric(&self, _descriptor: &MetricDescriptor) -> Result<(), SinkError> {
        Ok(())
    }

    fn record(&self, _name: &str, _value: f64, _tags: &Tags) -> Result<(), SinkError> {
        Ok(())
    }
}

/// One value captured by a [`MemorySink`].
#[derive(Clone, Debug, PartialEq)]
pub struct Recorded {
    pub name: String,
    pub value: f64,
    pub tags: Tags,
}

/// In-process sink that keeps every registration and recording.
///
/// Recording an unregistered name is an error, mirroring strict backends.
#[derive(Debug, Default)]
pub struct MemorySink {
    descriptors: Mutex<HashMap<String, MetricDescriptor>>,
    records: Mutex<Vec<Recorded>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn descriptor(&self, name: &str) -> Option<MetricDescriptor> {
        self.descriptors.lock().get(name).cloned()
    }

    pub fn records(&self) -> Vec<Recorded> {
        self.records.lock().clone()
    }

    pub fn records_for(&self, name: &str) -> Vec<Recorded> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.name == name)
            .cloned()
            .collect()
    }

    /// Sum of all values recorded under `name`.
    pub fn total(&self, name: &str) -> f64 {
        self.records
            .lock()
            .iter()
            .filter(|r| r.name == name)
            .map(|r| r.value)
            .sum()
    }
}

impl MetricsSink for MemorySink {
    fn register_metric(&self, descriptor: &MetricDescriptor) -> Result<(), SinkError> {
        let mut descriptors = self.descriptors.lock();
        match descriptors.get(&descriptor.name) {
            Some(existing) if existing.kind != descriptor.kind => {
                Err(SinkError::KindMismatch(descriptor.name.clone()))
            }
            Some(_) => Ok(()),
            None => {
                descriptors.insert(descriptor.name.clone(), descriptor.clone());
                Ok(())
            }
        }
    }

    fn record(&self, name: &str, value: f64, tags: &Tags) -> Result<(), SinkError> {
        if !self.descriptors.lock().contains_key(name) {
            return Err(SinkError::Unregistered(name.to_string()));
        }
        self.records.lock().push(Recorded {
            name: name.to_string(),
            value,
            tags: tags.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_requires_registration() {
        let sink = MemorySink::new();
        assert_eq!(
            sink.record("x", 1.0, &Tags::new()),
            Err(SinkError::Unregistered("x".into()))
        );

        sink.register_metric(&MetricDescriptor::new("x", MetricKind::Counter))
            .unwrap();
        sink.record("x", 1.0, &Tags::new()).unwrap();
        sink.record("x", 2.0, &Tags::new()).unwrap();
        assert_eq!(sink.total("x"), 3.0);
    }

    #[test]
    fn test_kind_mismatch() {
        let sink = MemorySink::new();
        sink.register_metric(&MetricDescriptor::new("x", MetricKind::Counter))
            .unwrap();
        assert!(sink
            .register_metric(&MetricDescriptor::new("x", MetricKind::Counter))
            .is_ok());
        assert_eq!(
            sink.register_metric(&MetricDescriptor::new("x", MetricKind::Gauge)),
            Err(SinkError::KindMismatch("x".into()))
        );
    }

    #[test]
    fn test_descriptor_serialization() {
        let d = MetricDescriptor::new("soulmesh_x", MetricKind::Histogram)
            .with_help("help")
            .with_tags(&["component"]);
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["kind"], "histogram");
        assert_eq!(json["tags"][0], "component");
    }
}

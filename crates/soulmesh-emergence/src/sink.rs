//! Outbound alert delivery.

use parking_lot::Mutex;
use soulmesh_core::EmergencePattern;
use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::broadcast;

/// Alerts kept by an [`AlertFeed`] unless configured otherwise.
pub const DEFAULT_FEED_SIZE: usize = 10;

/// Errors reported by an alert sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlertError {
    #[error("no observers connected")]
    NoObservers,

    #[error("alert channel unavailable: {0}")]
    Unavailable(String),
}

/// Destination for emergence alerts (dashboard socket, pager, log, ...).
pub trait AlertSink: Send + Sync {
    fn send(&self, pattern: &EmergencePattern) -> Result<(), AlertError>;
}

impl<F> AlertSink for F
where
    F: Fn(&EmergencePattern) -> Result<(), AlertError> + Send + Sync,
{
    fn send(&self, pattern: &EmergencePattern) -> Result<(), AlertError> {
        self(pattern)
    }
}

/// Forwards alerts to every receiver of a tokio broadcast channel.
#[derive(Clone, Debug)]
pub struct BroadcastSink {
    tx: broadcast::Sender<EmergencePattern>,
}

impl AlertSink for BroadcastSink {
    fn send(&self, pattern: &EmergencePattern) -> Result<(), AlertError> {
        self.tx
            .send(pattern.clone())
            .map(|_| ())
            .map_err(|_| AlertError::NoObservers)
    }
}

/// Adapt a broadcast sender into an [`AlertSink`].
pub fn broadcast_sink(tx: broadcast::Sender<EmergencePattern>) -> BroadcastSink {
    BroadcastSink { tx }
}

/// Bounded list of the most recent alerts, newest first.
#[derive(Debug)]
pub struct AlertFeed {
    alerts: Mutex<VecDeque<EmergencePattern>>,
    capacity: usize,
}

impl AlertFeed {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        AlertFeed {
            alerts: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Add an alert, dropping the oldest beyond capacity.
    pub fn push(&self, pattern: EmergencePattern) {
        let mut alerts = self.alerts.lock();
        alerts.push_front(pattern);
        alerts.truncate(self.capacity);
    }

    pub fn recent(&self) -> Vec<EmergencePattern> {
        self.alerts.lock().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<EmergencePattern> {
        self.alerts.lock().front().cloned()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.lock().is_empty()
    }

    pub fn clear(&self) {
        self.alerts.lock().clear();
    }
}

impl Default for AlertFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_SIZE)
    }
}

impl AlertSink for AlertFeed {
    fn send(&self, pattern: &EmergencePattern) -> Result<(), AlertError> {
        self.push(pattern.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soulmesh_core::{PatternType, Severity};

    fn alert(ts: u64) -> EmergencePattern {
        EmergencePattern::new(PatternType::ConflictCascade, Severity::High, ts)
    }

    #[test]
    fn test_feed_keeps_newest_first() {
        let feed = AlertFeed::default();
        for ts in 0..15 {
            feed.push(alert(ts));
        }
        let recent = feed.recent();
        assert_eq!(recent.len(), DEFAULT_FEED_SIZE);
        assert_eq!(recent[0].timestamp, 14);
        assert_eq!(recent[9].timestamp, 5);
        assert_eq!(feed.latest().unwrap().timestamp, 14);
    }

    #[test]
    fn test_closure_sink() {
        let sink = |p: &EmergencePattern| {
            if p.severity == Severity::Critical {
                Err(AlertError::Unavailable("pager down".into()))
            } else {
                Ok(())
            }
        };
        assert!(sink.send(&alert(1)).is_ok());
        let critical = EmergencePattern::new(PatternType::RollbackChain, Severity::Critical, 1);
        assert!(sink.send(&critical).is_err());
    }

    #[tokio::test]
    async fn test_broadcast_sink() {
        let (tx, mut rx) = broadcast::channel(4);
        let sink = broadcast_sink(tx);
        sink.send(&alert(7)).unwrap();
        assert_eq!(rx.recv().await.unwrap().timestamp, 7);

        drop(rx);
        assert_eq!(sink.send(&alert(8)), Err(AlertError::NoObservers));
    }
}

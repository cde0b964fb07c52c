//! Lifecycle of individual conflict instances.
//!
//! ```text
//! DETECTED -> RESOLVING -> RESOLVED
//!                       \-> ROLLED_BACK
//! ```
//!
//! Both terminal states close the instance. A later conflict on the same
//! component opens a new instance with a fresh id.

use crate::error::{MergeError, Result};
use serde::{Deserialize, Serialize};
use soulmesh_core::{now_millis, NodeId};
use std::collections::{HashMap, VecDeque};
use ulid::Ulid;

/// Phase of a conflict instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictPhase {
    Detected,
    Resolving,
    Resolved,
    RolledBack,
}

impl ConflictPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConflictPhase::Resolved | ConflictPhase::RolledBack)
    }

    fn can_advance_to(&self, next: ConflictPhase) -> bool {
        matches!(
            (self, next),
            (ConflictPhase::Detected, ConflictPhase::Resolving)
                | (ConflictPhase::Resolving, ConflictPhase::Resolved)
                | (ConflictPhase::Resolving, ConflictPhase::RolledBack)
        )
    }
}

/// One divergence of a component, tracked from detection to its end.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInstance {
    pub id: Ulid,
    pub component: String,
    pub nodes: Vec<NodeId>,
    pub phase: ConflictPhase,
    pub opened_at: u64,
    pub closed_at: Option<u64>,
}

impl ConflictInstance {
    pub fn new(component: impl Into<String>, nodes: Vec<NodeId>) -> Self {
        ConflictInstance {
            id: Ulid::new(),
            component: component.into(),
            nodes,
            phase: ConflictPhase::Detected,
            opened_at: now_millis(),
            closed_at: None,
        }
    }

    /// Move to the next phase, rejecting transitions the lifecycle does not allow.
    pub fn advance(&mut self, next: ConflictPhase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(MergeError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        if next.is_terminal() {
            self.closed_at = Some(now_millis());
        }
        Ok(())
    }
}

/// Open conflict instances per component, plus a bounded record of closed ones.
#[derive(Debug)]
pub struct ConflictTracker {
    active: HashMap<String, ConflictInstance>,
    closed: VecDeque<ConflictInstance>,
    max_closed: usize,
}

impl ConflictTracker {
    pub fn new(max_closed: usize) -> Self {
        ConflictTracker {
            active: HashMap::new(),
            closed: VecDeque::with_capacity(max_closed),
            max_closed,
        }
    }

    /// Open a conflict on `component`. A duplicate detection while an
    /// instance is still open joins that instance instead of opening another.
    pub fn open(&mut self, component: &str, nodes: Vec<NodeId>) -> Ulid {
        self.active
            .entry(component.to_string())
            .or_insert_with(|| ConflictInstance::new(component, nodes))
            .id
    }

    /// Advance the open instance of `component`; terminal phases close it.
    pub fn advance(
        &mut self,
        component: &str,
        next: ConflictPhase,
    ) -> Result<Option<&ConflictInstance>> {
        let Some(instance) = self.active.get_mut(component) else {
            return Ok(None);
        };
        instance.advance(next)?;

        if next.is_terminal() {
            if let Some(done) = self.active.remove(component) {
                if self.max_closed > 0 {
                    if self.closed.len() == self.max_closed {
                        self.closed.pop_front();
                    }
                    self.closed.push_back(done);
                }
            }
            return Ok(self.closed.back().filter(|c| c.component == component));
        }
        Ok(self.active.get(component))
    }

    pub fn active(&self, component: &str) -> Option<&ConflictInstance> {
        self.active.get(component)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Closed instances, oldest first.
    pub fn closed(&self) -> impl Iterator<Item = &ConflictInstance> {
        self.closed.iter()
    }
}

impl Default for ConflictTracker {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_to_resolved() {
        let mut instance = ConflictInstance::new("c", vec!["a".into(), "b".into()]);
        assert_eq!(instance.phase, ConflictPhase::Detected);
        instance.advance(ConflictPhase::Resolving).unwrap();
        instance.advance(ConflictPhase::Resolved).unwrap();
        assert!(instance.phase.is_terminal());
        assert!(instance.closed_at.is_some());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut instance = ConflictInstance::new("c", vec![]);
        assert!(matches!(
            instance.advance(ConflictPhase::Resolved),
            Err(MergeError::InvalidTransition {
                from: ConflictPhase::Detected,
                to: ConflictPhase::Resolved
            })
        ));

        instance.advance(ConflictPhase::Resolving).unwrap();
        instance.advance(ConflictPhase::RolledBack).unwrap();
        assert!(instance.advance(ConflictPhase::Resolving).is_err());
    }

    #[test]
    fn test_tracker_opens_fresh_instance_after_close() {
        let mut tracker = ConflictTracker::new(4);
        let first = tracker.open("c", vec!["a".into()]);
        assert_eq!(tracker.open("c", vec!["a".into()]), first);

        tracker.advance("c", ConflictPhase::Resolving).unwrap();
        let closed = tracker.advance("c", ConflictPhase::Resolved).unwrap().unwrap();
        assert_eq!(closed.id, first);
        assert_eq!(tracker.active_count(), 0);

        let second = tracker.open("c", vec!["a".into()]);
        assert_ne!(second, first);
        assert_eq!(tracker.closed().count(), 1);
    }

    #[test]
    fn test_tracker_history_is_bounded() {
        let mut tracker = ConflictTracker::new(2);
        for _ in 0..5 {
            tracker.open("c", vec![]);
            tracker.advance("c", ConflictPhase::Resolving).unwrap();
            tracker.advance("c", ConflictPhase::RolledBack).unwrap();
        }
        assert_eq!(tracker.closed().count(), 2);
    }
}

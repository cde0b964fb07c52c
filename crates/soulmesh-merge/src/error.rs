//! Error types for the merge-safety gate.

use crate::conflict::ConflictPhase;
use soulmesh_core::RollbackTrace;
use thiserror::Error;

/// Why a peer proposal was judged unsafe to apply.
///
/// Validation failures are expected and recoverable: the gate answers them
/// with an immediate rollback, never with an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("peer {peer} regressed counter of {node}: known {known}, proposed {proposed}")]
    CausalRegression {
        peer: String,
        node: String,
        known: u64,
        proposed: u64,
    },

    #[error("peer {peer} claims {proposed} updates from {node}, only {local} exist")]
    FutureCounter {
        peer: String,
        node: String,
        local: u64,
        proposed: u64,
    },

    #[error("state rejected by validator: {0}")]
    InvalidState(String),

    #[error("conflict could not be resolved: {0}")]
    Unresolvable(String),
}

impl ValidationFailure {
    /// Short machine-readable reason recorded in rollback traces.
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationFailure::CausalRegression { .. } => "causal_regression",
            ValidationFailure::FutureCounter { .. } => "future_counter",
            ValidationFailure::InvalidState(_) => "invalid_state",
            ValidationFailure::Unresolvable(_) => "unresolvable",
        }
    }
}

/// Hard failures of the merge gate.
#[derive(Error, Debug, Clone)]
pub enum MergeError {
    /// There was no known-good state to revert to. Requires an operator.
    #[error("rollback failed for component {}: no known-good state ({cause})", .trace.component)]
    RollbackFailure {
        trace: RollbackTrace,
        cause: ValidationFailure,
    },

    #[error("invalid conflict transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: ConflictPhase,
        to: ConflictPhase,
    },
}

pub type Result<T> = std::result::Result<T, MergeError>;

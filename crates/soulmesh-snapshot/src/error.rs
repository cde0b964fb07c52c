//! Error types for snapshot operations.

use thiserror::Error;

/// Errors that can occur while encoding, storing or loading snapshots.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid snapshot data: {0}")]
    InvalidData(String),

    #[error("Snapshot not found: {0}")]
    NotFound(String),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

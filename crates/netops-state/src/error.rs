use thiserror::Error;

use crate::types::{ObjectKey, ObjectKind};

/// Result alias for store operations.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open object store: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("failed to encode {kind} {key}: {message}")]
    Encode {
        kind: ObjectKind,
        key: String,
        message: String,
    },

    #[error("failed to decode {kind} {key}: {message}")]
    Decode {
        kind: ObjectKind,
        key: String,
        message: String,
    },

    #[error("{0} {1} not found")]
    NotFound(ObjectKind, ObjectKey),

    /// Optimistic-concurrency check failed on `put`.
    #[error("{kind} {key} was modified concurrently (expected version {expected}, found {found})")]
    Conflict {
        kind: ObjectKind,
        key: ObjectKey,
        expected: u64,
        found: u64,
    },
}

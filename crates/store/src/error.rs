//! Storage error types.

use thiserror::Error;

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A KV key holds a value of a different type than the operation
    /// expects (e.g. `incr` on a blob).
    #[error("wrong value type at key {key}: {operation} not applicable")]
    WrongType {
        /// The key in question.
        key: String,
        /// The attempted operation.
        operation: &'static str,
    },

    /// A referenced record does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A status transition on a record was invalid.
    #[error(transparent)]
    Transition(#[from] conflux_core::CoreError),

    /// A serialization or deserialization error.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend is unreachable or refused the operation.
    #[error("storage backend: {0}")]
    Backend(String),
}

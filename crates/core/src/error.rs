//! Core error types.

use thiserror::Error;

/// Errors raised by core validation.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A status transition is not valid for the current status.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Attempted target status.
        to: String,
    },
}

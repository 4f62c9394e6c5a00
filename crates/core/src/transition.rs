//! State machine transition validation for execution statuses.

use crate::error::CoreError;
use crate::status::ExecutionStatus;

/// Returns `true` if the transition from `from` to `to` is valid.
#[must_use]
pub fn can_transition(from: ExecutionStatus, to: ExecutionStatus) -> bool {
    matches!(
        (from, to),
        (ExecutionStatus::Pending, ExecutionStatus::Running)
            | (ExecutionStatus::Pending, ExecutionStatus::Failed)
            | (ExecutionStatus::Pending, ExecutionStatus::Cancelled)
            | (ExecutionStatus::Running, ExecutionStatus::Interrupted)
            | (ExecutionStatus::Running, ExecutionStatus::Completed)
            | (ExecutionStatus::Running, ExecutionStatus::Failed)
            | (ExecutionStatus::Running, ExecutionStatus::Cancelled)
            | (ExecutionStatus::Interrupted, ExecutionStatus::Running)
            | (ExecutionStatus::Interrupted, ExecutionStatus::Failed)
            | (ExecutionStatus::Interrupted, ExecutionStatus::Cancelled)
    )
}

/// Validate a status transition, returning an error if invalid.
pub fn validate_transition(from: ExecutionStatus, to: ExecutionStatus) -> Result<(), CoreError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

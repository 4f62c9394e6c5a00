//! Execution- and node-level status tracking.

use serde::{Deserialize, Serialize};

/// The overall status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created but not yet picked up by the scheduler.
    Pending,
    /// Node jobs are enqueued or running.
    Running,
    /// Waiting for human input at an interrupt point.
    Interrupted,
    /// All reachable nodes completed and the execution finalized.
    Completed,
    /// A node failed permanently, the budget was exceeded, or the
    /// execution was recovered as a zombie.
    Failed,
    /// Cancelled by an external request.
    Cancelled,
}

impl ExecutionStatus {
    /// Returns `true` if the execution has reached a final state.
    ///
    /// Terminal statuses are sinks: no transition leaves them.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns `true` if node jobs for this execution may run.
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        matches!(self, Self::Running | Self::Interrupted)
    }

    /// Returns `true` if the execution completed successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The status of a single node attempt, as surfaced on the event channel
/// and in execution log rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    /// The component function is being invoked.
    Running,
    /// The attempt finished and its result was applied.
    Completed,
    /// The attempt raised an error (a retry may follow).
    Failed,
    /// The node suspended waiting for a child execution.
    Waiting,
}

impl std::fmt::Display for NodeRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Waiting => write!(f, "waiting"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());

        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Interrupted.is_terminal());
    }

    #[test]
    fn runnable_states() {
        assert!(ExecutionStatus::Running.is_runnable());
        assert!(ExecutionStatus::Interrupted.is_runnable());

        assert!(!ExecutionStatus::Pending.is_runnable());
        assert!(!ExecutionStatus::Completed.is_runnable());
        assert!(!ExecutionStatus::Failed.is_runnable());
    }

    #[test]
    fn success_state() {
        assert!(ExecutionStatus::Completed.is_success());
        assert!(!ExecutionStatus::Failed.is_success());
        assert!(!ExecutionStatus::Running.is_success());
    }

    #[test]
    fn display_formatting() {
        assert_eq!(ExecutionStatus::Pending.to_string(), "pending");
        assert_eq!(ExecutionStatus::Running.to_string(), "running");
        assert_eq!(ExecutionStatus::Interrupted.to_string(), "interrupted");
        assert_eq!(ExecutionStatus::Completed.to_string(), "completed");
        assert_eq!(ExecutionStatus::Failed.to_string(), "failed");
        assert_eq!(ExecutionStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn serde_rename_snake_case() {
        let json = serde_json::to_string(&ExecutionStatus::Interrupted).unwrap();
        assert_eq!(json, "\"interrupted\"");

        let back: ExecutionStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(back, ExecutionStatus::Failed);
    }

    #[test]
    fn node_run_status_display() {
        assert_eq!(NodeRunStatus::Running.to_string(), "running");
        assert_eq!(NodeRunStatus::Completed.to_string(), "completed");
        assert_eq!(NodeRunStatus::Failed.to_string(), "failed");
        assert_eq!(NodeRunStatus::Waiting.to_string(), "waiting");
    }
}

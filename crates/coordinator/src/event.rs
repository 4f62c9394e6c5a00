//! Execution lifecycle events published to the KV channels.
//!
//! Events are fire-and-forget projections for live UX; the execution
//! record and log rows are the source of truth, never these.

use conflux_core::NodeRunStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event published on `execution:<id>` and mirrored on
/// `workflow:<slug>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// The execution transitioned to running.
    ExecutionStarted {
        /// The execution identifier.
        execution_id: String,
        /// Slug of the workflow.
        workflow_slug: String,
    },
    /// The execution finalized successfully.
    ExecutionCompleted {
        /// The execution identifier.
        execution_id: String,
        /// The extracted final output.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        final_output: Option<Value>,
    },
    /// The execution failed permanently.
    ExecutionFailed {
        /// The execution identifier.
        execution_id: String,
        /// Failure description.
        error: String,
    },
    /// The execution paused for human confirmation.
    ExecutionInterrupted {
        /// The execution identifier.
        execution_id: String,
        /// The node awaiting confirmation.
        node_id: String,
        /// Prompt shown to the user.
        prompt: String,
        /// Short id of the pending task.
        task_id: String,
    },
    /// The execution was cancelled externally.
    ExecutionCancelled {
        /// The execution identifier.
        execution_id: String,
    },
    /// A node attempt changed status.
    NodeStatus {
        /// The execution identifier.
        execution_id: String,
        /// The node in question.
        node_id: String,
        /// New attempt status.
        status: NodeRunStatus,
        /// Attempt duration, present on terminal statuses.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        /// Truncated output preview.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        /// Truncated error preview.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ExecutionEvent {
    /// The wire name of this event (`type` field on the channel).
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExecutionStarted { .. } => "execution_started",
            Self::ExecutionCompleted { .. } => "execution_completed",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::ExecutionInterrupted { .. } => "execution_interrupted",
            Self::ExecutionCancelled { .. } => "execution_cancelled",
            Self::NodeStatus { .. } => "node_status",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_tag() {
        let events = [
            ExecutionEvent::ExecutionStarted {
                execution_id: "e1".into(),
                workflow_slug: "wf".into(),
            },
            ExecutionEvent::ExecutionCompleted {
                execution_id: "e1".into(),
                final_output: None,
            },
            ExecutionEvent::ExecutionFailed {
                execution_id: "e1".into(),
                error: "boom".into(),
            },
            ExecutionEvent::ExecutionCancelled {
                execution_id: "e1".into(),
            },
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.kind());
        }
    }

    #[test]
    fn node_status_omits_absent_fields() {
        let event = ExecutionEvent::NodeStatus {
            execution_id: "e1".into(),
            node_id: "agent_1".into(),
            status: NodeRunStatus::Running,
            duration_ms: None,
            output: None,
            error: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "node_status");
        assert_eq!(value["status"], "running");
        assert!(value.get("duration_ms").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn serde_roundtrip() {
        let event = ExecutionEvent::ExecutionInterrupted {
            execution_id: "e1".into(),
            node_id: "confirm_1".into(),
            prompt: "Proceed?".into(),
            task_id: "ab12cd34".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: ExecutionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}

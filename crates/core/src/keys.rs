//! Canonical builders for per-execution coordination keys.
//!
//! All coordination state for one execution lives in the KV store under
//! the `execution:<execution_id>:` prefix, and is deleted wholesale by
//! cleanup at finalization. Every key used by the orchestrator is built
//! here so the cleanup pattern and the writers can never drift apart.

use crate::id::{ExecutionId, NodeId, WorkflowId};

/// Prefix shared by every coordination key of one execution.
#[must_use]
pub fn execution_prefix(execution_id: &ExecutionId) -> String {
    format!("execution:{execution_id}:")
}

/// Glob pattern matching all coordination keys of one execution.
#[must_use]
pub fn cleanup_pattern(execution_id: &ExecutionId) -> String {
    format!("execution:{execution_id}:*")
}

/// The mutable state blob.
#[must_use]
pub fn state(execution_id: &ExecutionId) -> String {
    format!("execution:{execution_id}:state")
}

/// The immutable topology snapshot.
#[must_use]
pub fn topology(execution_id: &ExecutionId) -> String {
    format!("execution:{execution_id}:topo")
}

/// Counter of node jobs currently enqueued or running.
#[must_use]
pub fn inflight(execution_id: &ExecutionId) -> String {
    format!("execution:{execution_id}:inflight")
}

/// Fan-in arrival counter for a merge node.
#[must_use]
pub fn fanin(execution_id: &ExecutionId, node_id: &NodeId) -> String {
    format!("execution:{execution_id}:fanin:{node_id}")
}

/// Set of node ids that reached a terminal state in this execution.
#[must_use]
pub fn completed(execution_id: &ExecutionId) -> String {
    format!("execution:{execution_id}:completed")
}

/// Per-loop iteration context blob.
#[must_use]
pub fn loop_context(execution_id: &ExecutionId, loop_id: &NodeId) -> String {
    format!("execution:{execution_id}:loop:{loop_id}")
}

/// Completion counter for one loop iteration.
#[must_use]
pub fn loop_iter_done(execution_id: &ExecutionId, loop_id: &NodeId, index: usize) -> String {
    format!("execution:{execution_id}:loop:{loop_id}:iter:{index}:done")
}

/// Handle for long-running conversational memory (opaque to the core).
#[must_use]
pub fn episode(execution_id: &ExecutionId) -> String {
    format!("execution:{execution_id}:episode_id")
}

/// Pub/sub channel carrying this execution's lifecycle events.
#[must_use]
pub fn execution_channel(execution_id: &ExecutionId) -> String {
    format!("execution:{execution_id}")
}

/// Pub/sub channel mirroring events for all executions of a workflow.
#[must_use]
pub fn workflow_channel(workflow_slug: &WorkflowId) -> String {
    format!("workflow:{workflow_slug}")
}

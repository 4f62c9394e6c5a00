//! Engine error types.

use conflux_core::{ExecutionId, WorkflowId};
use thiserror::Error;

/// Errors raised by the orchestrator.
///
/// Errors escaping a job handler are routed to the outer failure path:
/// the execution is marked failed, its inflight token released, and its
/// coordination keys cleaned.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A storage operation failed.
    #[error(transparent)]
    Store(#[from] conflux_store::StoreError),

    /// State could not be decoded or applied.
    #[error(transparent)]
    State(#[from] conflux_state::StateError),

    /// The topology could not be built.
    #[error(transparent)]
    Topology(#[from] conflux_topology::TopologyError),

    /// A component invocation failed.
    #[error(transparent)]
    Component(#[from] conflux_component::ComponentError),

    /// A referenced execution does not exist.
    #[error("execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    /// A referenced workflow does not exist.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    /// The target workflow refuses new executions.
    #[error("workflow is inactive: {0}")]
    WorkflowInactive(WorkflowId),

    /// Coordination state vanished for a live execution.
    #[error("missing coordination state: {0}")]
    MissingState(String),
}

//! Topology build errors.

use conflux_core::NodeId;
use thiserror::Error;

/// Errors raised while building a topology snapshot.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// The workflow has no nodes to schedule.
    #[error("workflow has no schedulable nodes")]
    EmptyWorkflow,

    /// An edge references a node that does not exist.
    #[error("edge {from} -> {target} references unknown node {unknown}")]
    UnknownNode {
        /// Edge source.
        from: NodeId,
        /// Edge target.
        target: NodeId,
        /// The missing endpoint.
        unknown: NodeId,
    },

    /// A conditional edge has no condition value.
    #[error("conditional edge {from} -> {target} has an empty condition value")]
    MissingConditionValue {
        /// Edge source.
        from: NodeId,
        /// Edge target.
        target: NodeId,
    },

    /// A conditional edge carries the retired mapping representation.
    #[error(
        "conditional edge {from} -> {target} uses a condition mapping; \
         recompile the workflow with per-edge condition values"
    )]
    LegacyConditionMapping {
        /// Edge source.
        from: NodeId,
        /// Edge target.
        target: NodeId,
    },

    /// The requested trigger is not part of the workflow.
    #[error("trigger node {0} not found in workflow")]
    TriggerNotFound(NodeId),
}

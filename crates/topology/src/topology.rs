//! The immutable per-execution topology snapshot.

use std::collections::HashMap;

use conflux_core::{NodeId, WorkflowId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A schedulable node in the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Graph-unique node id.
    pub node_id: NodeId,
    /// Component type implementing this node.
    pub component_type: String,
    /// Backing row id in the relational store.
    #[serde(default)]
    pub db_id: Option<i64>,
    /// Component configuration reference.
    #[serde(default)]
    pub component_config_id: Option<String>,
    /// Pause for human confirmation before the node runs.
    #[serde(default)]
    pub interrupt_before: bool,
    /// Pause for human confirmation after the node runs.
    #[serde(default)]
    pub interrupt_after: bool,
    /// Per-node retry cap; the engine default applies when absent.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// How a traversable edge selects its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EdgeKind {
    /// Always taken.
    Direct,
    /// Taken when the state route equals `condition_value`.
    Conditional {
        /// Route literal this edge matches.
        condition_value: String,
    },
}

/// A traversable edge of the snapshot (direct or conditional only;
/// loop-structure and sub-component wiring never appear here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Source node.
    pub source_node_id: NodeId,
    /// Target node (or the `__end__` sentinel).
    pub target_node_id: NodeId,
    /// How the edge selects its target.
    pub kind: EdgeKind,
    /// Evaluation order among siblings.
    pub priority: i32,
}

/// Immutable per-execution snapshot of a workflow graph.
///
/// Built once by [`TopologyBuilder`](crate::builder::TopologyBuilder),
/// cached in the KV store, and read by every node job of the execution.
/// Loop edges form cycles in the stored edge set but not here: loop-body
/// and loop-return structure lives in dedicated collections and
/// `edges_by_source` stays acyclic for advancement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    /// Slug of the owning workflow.
    pub workflow_slug: WorkflowId,
    /// Nodes directly downstream of the chosen trigger.
    pub entry_node_ids: Vec<NodeId>,
    /// All schedulable nodes, in definition order.
    pub nodes: IndexMap<NodeId, NodeSpec>,
    /// Traversable edges grouped by source.
    pub edges_by_source: HashMap<NodeId, Vec<Edge>>,
    /// Count of direct incoming edges from in-graph nodes (fan-in
    /// arming); excludes trigger, sub-component and loop edges.
    pub incoming_count: HashMap<NodeId, u32>,
    /// Loop head to immediate body entry nodes.
    pub loop_bodies: HashMap<NodeId, Vec<NodeId>>,
    /// Loop head to body nodes that close back to it.
    pub loop_return_nodes: HashMap<NodeId, Vec<NodeId>>,
    /// Loop head to every node belonging to its body.
    pub loop_body_all_nodes: HashMap<NodeId, Vec<NodeId>>,
}

impl Topology {
    /// Look up a node spec.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&NodeSpec> {
        self.nodes.get(node_id)
    }

    /// Traversable edges out of a node.
    #[must_use]
    pub fn edges_from(&self, node_id: &NodeId) -> &[Edge] {
        self.edges_by_source
            .get(node_id)
            .map_or(&[], Vec::as_slice)
    }

    /// Number of fan-in arming parents for a node.
    #[must_use]
    pub fn incoming(&self, node_id: &NodeId) -> u32 {
        self.incoming_count.get(node_id).copied().unwrap_or(0)
    }

    /// Returns `true` if the node waits for multiple parents.
    #[must_use]
    pub fn is_fan_in(&self, node_id: &NodeId) -> bool {
        self.incoming(node_id) > 1
    }

    /// The loop this node belongs to, if it is part of a loop body.
    #[must_use]
    pub fn loop_containing(&self, node_id: &NodeId) -> Option<&NodeId> {
        self.loop_body_all_nodes
            .iter()
            .find(|(_, members)| members.contains(node_id))
            .map(|(loop_id, _)| loop_id)
    }

    /// Immediate body entry nodes of a loop.
    #[must_use]
    pub fn body_targets(&self, loop_id: &NodeId) -> &[NodeId] {
        self.loop_bodies.get(loop_id).map_or(&[], Vec::as_slice)
    }

    /// How many body completions close one iteration of a loop: the
    /// number of explicit return nodes, falling back to the number of
    /// body entries when none are declared.
    #[must_use]
    pub fn iteration_threshold(&self, loop_id: &NodeId) -> usize {
        let returns = self
            .loop_return_nodes
            .get(loop_id)
            .map_or(0, Vec::len);
        if returns > 0 {
            returns
        } else {
            self.loop_bodies.get(loop_id).map_or(0, Vec::len)
        }
    }
}

//! Workflow graph records: the compiler's stored representation.

use conflux_core::{NodeId, WorkflowId};
use serde::{Deserialize, Serialize};

/// Component types that never execute: they are configuration consumed
/// by their consumer node's factory, not schedulable nodes.
pub const SUB_COMPONENT_TYPES: [&str; 2] = ["ai_model", "output_parser"];

/// Prefix shared by all trigger component types.
pub const TRIGGER_TYPE_PREFIX: &str = "trigger_";

/// How an edge selects its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// Always taken.
    Direct,
    /// Taken when the state route equals the edge's condition value.
    Conditional,
}

/// The wiring role of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeLabel {
    /// Ordinary control-flow edge.
    #[default]
    #[serde(rename = "")]
    Plain,
    /// Model wiring into the target's factory.
    Llm,
    /// Tool wiring into the target's factory.
    Tool,
    /// Parser wiring into the target's factory.
    OutputParser,
    /// Loop head to body entry.
    LoopBody,
    /// Body completion node back to the loop head.
    LoopReturn,
}

impl EdgeLabel {
    /// Returns `true` for wiring consumed by component factories,
    /// never traversed for advancement.
    #[must_use]
    pub fn is_sub_component(&self) -> bool {
        matches!(self, Self::Llm | Self::Tool | Self::OutputParser)
    }

    /// Returns `true` for the loop-structure labels.
    #[must_use]
    pub fn is_loop(&self) -> bool {
        matches!(self, Self::LoopBody | Self::LoopReturn)
    }
}

/// A stored workflow node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
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

impl NodeRecord {
    /// Create a node record with the given id and component type.
    pub fn new(node_id: impl Into<NodeId>, component_type: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            component_type: component_type.into(),
            db_id: None,
            component_config_id: None,
            interrupt_before: false,
            interrupt_after: false,
            max_retries: None,
        }
    }

    /// Cap this node's retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Mark this node as interrupting before execution.
    #[must_use]
    pub fn with_interrupt_before(mut self) -> Self {
        self.interrupt_before = true;
        self
    }

    /// Mark this node as interrupting after execution.
    #[must_use]
    pub fn with_interrupt_after(mut self) -> Self {
        self.interrupt_after = true;
        self
    }

    /// Attach a component config reference.
    #[must_use]
    pub fn with_config(mut self, config_id: impl Into<String>) -> Self {
        self.component_config_id = Some(config_id.into());
        self
    }

    /// Returns `true` if this node is a trigger.
    #[must_use]
    pub fn is_trigger(&self) -> bool {
        self.component_type.starts_with(TRIGGER_TYPE_PREFIX)
    }

    /// Returns `true` if this node is config-only sub-component wiring.
    #[must_use]
    pub fn is_sub_component(&self) -> bool {
        SUB_COMPONENT_TYPES.contains(&self.component_type.as_str())
    }

    /// Returns `true` if the orchestrator schedules this node.
    #[must_use]
    pub fn is_schedulable(&self) -> bool {
        !self.is_trigger() && !self.is_sub_component()
    }
}

/// A stored workflow edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Source node.
    pub source_node_id: NodeId,
    /// Target node (or the `__end__` sentinel).
    pub target_node_id: NodeId,
    /// How the edge selects its target.
    #[serde(default = "EdgeRecord::default_edge_type")]
    pub edge_type: EdgeType,
    /// The wiring role of the edge.
    #[serde(default)]
    pub edge_label: EdgeLabel,
    /// Route literal this edge matches (conditional edges only).
    #[serde(default)]
    pub condition_value: String,
    /// Retired multi-route representation; rejected at build time.
    #[serde(default)]
    pub condition_mapping: Option<serde_json::Map<String, serde_json::Value>>,
    /// Evaluation order among siblings.
    #[serde(default)]
    pub priority: i32,
}

impl EdgeRecord {
    fn default_edge_type() -> EdgeType {
        EdgeType::Direct
    }

    /// Create a direct edge.
    pub fn direct(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source_node_id: source.into(),
            target_node_id: target.into(),
            edge_type: EdgeType::Direct,
            edge_label: EdgeLabel::Plain,
            condition_value: String::new(),
            condition_mapping: None,
            priority: 0,
        }
    }

    /// Create a conditional edge matching the given route value.
    pub fn conditional(
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        condition_value: impl Into<String>,
    ) -> Self {
        Self {
            edge_type: EdgeType::Conditional,
            condition_value: condition_value.into(),
            ..Self::direct(source, target)
        }
    }

    /// Set the wiring label.
    #[must_use]
    pub fn with_label(mut self, label: EdgeLabel) -> Self {
        self.edge_label = label;
        self
    }
}

/// A stored workflow: its slug plus node and edge records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    /// Workflow slug.
    pub slug: WorkflowId,
    /// All nodes, including triggers and sub-components.
    pub nodes: Vec<NodeRecord>,
    /// All edges, including wiring and loop-structure edges.
    pub edges: Vec<EdgeRecord>,
}

impl WorkflowGraph {
    /// Create a workflow graph.
    #[must_use]
    pub fn new(slug: WorkflowId, nodes: Vec<NodeRecord>, edges: Vec<EdgeRecord>) -> Self {
        Self { slug, nodes, edges }
    }
}

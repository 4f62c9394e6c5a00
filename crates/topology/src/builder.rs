//! Builds a [`Topology`] snapshot from stored workflow records.

use std::collections::{HashMap, HashSet, VecDeque};

use conflux_core::constants::END_TARGET;
use conflux_core::NodeId;
use indexmap::IndexMap;

use crate::error::TopologyError;
use crate::record::{EdgeLabel, EdgeRecord, EdgeType, NodeRecord, WorkflowGraph};
use crate::topology::{Edge, EdgeKind, NodeSpec, Topology};

/// Builds immutable topology snapshots scoped to a trigger.
pub struct TopologyBuilder;

impl TopologyBuilder {
    /// Build the snapshot for one execution.
    ///
    /// Triggers and config-only sub-components are dropped from the node
    /// set; sub-component and loop-structure edges are kept out of the
    /// traversable edge lists. With a trigger id, entry points are that
    /// trigger's direct targets; without one, they are the schedulable
    /// roots (no arming parents, not inside a loop body).
    pub fn build(
        graph: &WorkflowGraph,
        trigger_node_id: Option<&NodeId>,
    ) -> Result<Topology, TopologyError> {
        let records: HashMap<&NodeId, &NodeRecord> = graph
            .nodes
            .iter()
            .map(|node| (&node.node_id, node))
            .collect();

        validate_edges(&graph.edges, &records)?;

        let nodes: IndexMap<NodeId, NodeSpec> = graph
            .nodes
            .iter()
            .filter(|node| node.is_schedulable())
            .map(|node| (node.node_id.clone(), spec_of(node)))
            .collect();
        if nodes.is_empty() {
            return Err(TopologyError::EmptyWorkflow);
        }

        if let Some(trigger) = trigger_node_id {
            match records.get(trigger) {
                Some(record) if record.is_trigger() => {}
                _ => return Err(TopologyError::TriggerNotFound(trigger.clone())),
            }
        }

        let mut edges_by_source: HashMap<NodeId, Vec<Edge>> = HashMap::new();
        let mut incoming_count: HashMap<NodeId, u32> = HashMap::new();
        for record in &graph.edges {
            if record.edge_label != EdgeLabel::Plain {
                continue;
            }
            if !nodes.contains_key(&record.source_node_id) {
                continue; // trigger or sub-component source
            }
            if record.target_node_id.as_str() != END_TARGET
                && !nodes.contains_key(&record.target_node_id)
            {
                continue;
            }
            if record.target_node_id.as_str() != END_TARGET {
                *incoming_count
                    .entry(record.target_node_id.clone())
                    .or_default() += 1;
            }
            edges_by_source
                .entry(record.source_node_id.clone())
                .or_default()
                .push(edge_of(record));
        }
        for edges in edges_by_source.values_mut() {
            edges.sort_by_key(|edge| edge.priority);
        }

        let mut loop_bodies: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut loop_return_nodes: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for record in &graph.edges {
            match record.edge_label {
                EdgeLabel::LoopBody => loop_bodies
                    .entry(record.source_node_id.clone())
                    .or_default()
                    .push(record.target_node_id.clone()),
                EdgeLabel::LoopReturn => loop_return_nodes
                    .entry(record.target_node_id.clone())
                    .or_default()
                    .push(record.source_node_id.clone()),
                _ => {}
            }
        }

        let loop_body_all_nodes = collect_loop_members(&loop_bodies, &edges_by_source);

        let entry_node_ids = match trigger_node_id {
            Some(trigger) => graph
                .edges
                .iter()
                .filter(|edge| {
                    edge.edge_label == EdgeLabel::Plain
                        && &edge.source_node_id == trigger
                        && nodes.contains_key(&edge.target_node_id)
                })
                .map(|edge| edge.target_node_id.clone())
                .collect(),
            None => {
                let in_loop: HashSet<&NodeId> =
                    loop_body_all_nodes.values().flatten().collect();
                nodes
                    .keys()
                    .filter(|id| {
                        incoming_count.get(*id).copied().unwrap_or(0) == 0
                            && !in_loop.contains(id)
                    })
                    .cloned()
                    .collect()
            }
        };

        Ok(Topology {
            workflow_slug: graph.slug.clone(),
            entry_node_ids,
            nodes,
            edges_by_source,
            incoming_count,
            loop_bodies,
            loop_return_nodes,
            loop_body_all_nodes,
        })
    }
}

fn validate_edges(
    edges: &[EdgeRecord],
    records: &HashMap<&NodeId, &NodeRecord>,
) -> Result<(), TopologyError> {
    for edge in edges {
        for endpoint in [&edge.source_node_id, &edge.target_node_id] {
            if endpoint.as_str() != END_TARGET && !records.contains_key(endpoint) {
                return Err(TopologyError::UnknownNode {
                    from: edge.source_node_id.clone(),
                    target: edge.target_node_id.clone(),
                    unknown: endpoint.clone(),
                });
            }
        }
        if edge.edge_type == EdgeType::Conditional {
            if edge.condition_mapping.is_some() {
                return Err(TopologyError::LegacyConditionMapping {
                    from: edge.source_node_id.clone(),
                    target: edge.target_node_id.clone(),
                });
            }
            if edge.condition_value.is_empty() {
                return Err(TopologyError::MissingConditionValue {
                    from: edge.source_node_id.clone(),
                    target: edge.target_node_id.clone(),
                });
            }
        }
    }
    Ok(())
}

fn spec_of(node: &NodeRecord) -> NodeSpec {
    NodeSpec {
        node_id: node.node_id.clone(),
        component_type: node.component_type.clone(),
        db_id: node.db_id,
        component_config_id: node.component_config_id.clone(),
        interrupt_before: node.interrupt_before,
        interrupt_after: node.interrupt_after,
        max_retries: node.max_retries,
    }
}

fn edge_of(record: &EdgeRecord) -> Edge {
    Edge {
        source_node_id: record.source_node_id.clone(),
        target_node_id: record.target_node_id.clone(),
        kind: match record.edge_type {
            EdgeType::Direct => EdgeKind::Direct,
            EdgeType::Conditional => EdgeKind::Conditional {
                condition_value: record.condition_value.clone(),
            },
        },
        priority: record.priority,
    }
}

/// Walk each loop body from its entry nodes along traversable edges,
/// collecting every member. The loop head itself is never a member;
/// loop-return edges close the cycle without being traversed.
fn collect_loop_members(
    loop_bodies: &HashMap<NodeId, Vec<NodeId>>,
    edges_by_source: &HashMap<NodeId, Vec<Edge>>,
) -> HashMap<NodeId, Vec<NodeId>> {
    let mut all = HashMap::new();
    for (loop_id, entries) in loop_bodies {
        let mut members: Vec<NodeId> = Vec::new();
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut queue: VecDeque<NodeId> = entries.iter().cloned().collect();
        while let Some(node) = queue.pop_front() {
            if node == *loop_id || !seen.insert(node.clone()) {
                continue;
            }
            members.push(node.clone());
            if let Some(edges) = edges_by_source.get(&node) {
                for edge in edges {
                    if edge.target_node_id.as_str() != END_TARGET {
                        queue.push_back(edge.target_node_id.clone());
                    }
                }
            }
        }
        all.insert(loop_id.clone(), members);
    }
    all
}

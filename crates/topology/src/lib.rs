#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Conflux Topology
//!
//! The immutable, per-execution view of a workflow graph.
//!
//! The graph compiler stores workflows as node and edge records
//! ([`WorkflowGraph`]); at execution start the [`TopologyBuilder`] turns
//! them into a [`Topology`] snapshot scoped to the chosen trigger:
//! triggers and config-only sub-components are excluded, fan-in counts
//! are precomputed, and loop-body / loop-return edges live in separate
//! collections from the traversable edge lists.

pub mod builder;
pub mod error;
pub mod record;
pub mod topology;

pub use builder::TopologyBuilder;
pub use error::TopologyError;
pub use record::{EdgeLabel, EdgeRecord, EdgeType, NodeRecord, WorkflowGraph};
pub use topology::{Edge, EdgeKind, NodeSpec, Topology};

//! Per-loop iteration context, stored in the KV under the loop key.

use conflux_core::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Iteration state of one loop within one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopContext {
    /// The items being iterated.
    pub items: Vec<Value>,
    /// Zero-based index of the current iteration.
    pub index: usize,
    /// Snapshots of completed iterations, in order.
    pub results: Vec<Value>,
    /// Immediate body entry nodes re-enqueued each iteration.
    pub body_targets: Vec<NodeId>,
}

impl LoopContext {
    /// Seed a fresh context at iteration zero.
    #[must_use]
    pub fn new(items: Vec<Value>, body_targets: Vec<NodeId>) -> Self {
        Self {
            items,
            index: 0,
            results: Vec::new(),
            body_targets,
        }
    }

    /// The item of the current iteration, if any remain.
    #[must_use]
    pub fn current_item(&self) -> Option<&Value> {
        self.items.get(self.index)
    }

    /// Returns `true` once every item has been iterated.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.index >= self.items.len()
    }
}

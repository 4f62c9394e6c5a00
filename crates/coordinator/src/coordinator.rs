//! The per-execution coordination facade.

use std::sync::Arc;

use conflux_core::{keys, ExecutionId, NodeId, WorkflowId};
use conflux_state::WorkflowState;
use conflux_store::{KvStore, StoreError};
use conflux_topology::Topology;

use crate::event::ExecutionEvent;
use crate::loop_ctx::LoopContext;

/// Typed operations on one execution's coordination keys.
///
/// Created per job from the shared KV handle; holds no state of its
/// own beyond the key prefix inputs.
#[derive(Clone)]
pub struct ExecutionCoordinator {
    kv: Arc<dyn KvStore>,
    execution_id: ExecutionId,
    workflow_slug: WorkflowId,
}

impl ExecutionCoordinator {
    /// Create a coordinator for one execution.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, execution_id: ExecutionId, workflow_slug: WorkflowId) -> Self {
        Self {
            kv,
            execution_id,
            workflow_slug,
        }
    }

    /// The execution this coordinator is scoped to.
    #[must_use]
    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    // ── state & topology blobs ──────────────────────────────────────────

    /// Persist the state blob.
    pub async fn save_state(&self, state: &WorkflowState) -> Result<(), StoreError> {
        let value = serde_json::to_value(state)?;
        self.kv.set(&keys::state(&self.execution_id), value).await
    }

    /// Load the state blob.
    pub async fn load_state(&self) -> Result<Option<WorkflowState>, StoreError> {
        match self.kv.get(&keys::state(&self.execution_id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Persist the topology snapshot. Written once at execution start.
    pub async fn save_topology(&self, topology: &Topology) -> Result<(), StoreError> {
        let value = serde_json::to_value(topology)?;
        self.kv
            .set(&keys::topology(&self.execution_id), value)
            .await
    }

    /// Load the topology snapshot.
    pub async fn load_topology(&self) -> Result<Option<Topology>, StoreError> {
        match self.kv.get(&keys::topology(&self.execution_id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    // ── counters ────────────────────────────────────────────────────────

    /// Count one more enqueued-or-running node job.
    pub async fn increment_inflight(&self) -> Result<i64, StoreError> {
        self.kv.incr(&keys::inflight(&self.execution_id)).await
    }

    /// Count one node job done; zero means the execution has drained.
    pub async fn decrement_inflight(&self) -> Result<i64, StoreError> {
        self.kv.decr(&keys::inflight(&self.execution_id)).await
    }

    /// Record one parent's arrival at a fan-in node, returning the
    /// arrival count so far.
    pub async fn arm_fanin(&self, node_id: &NodeId) -> Result<i64, StoreError> {
        self.kv
            .incr(&keys::fanin(&self.execution_id, node_id))
            .await
    }

    /// Reset a fan-in counter after the node has been enqueued.
    pub async fn clear_fanin(&self, node_id: &NodeId) -> Result<(), StoreError> {
        self.kv
            .delete(&keys::fanin(&self.execution_id, node_id))
            .await
    }

    // ── completed-node set ──────────────────────────────────────────────

    /// Mark a node as completed. Returns `false` when the node was
    /// already recorded, which signals a duplicate delivery.
    pub async fn mark_completed(&self, node_id: &NodeId) -> Result<bool, StoreError> {
        self.kv
            .sadd(&keys::completed(&self.execution_id), node_id.as_str())
            .await
    }

    /// Returns `true` if the node already completed in this execution.
    pub async fn is_completed(&self, node_id: &NodeId) -> Result<bool, StoreError> {
        let members = self
            .kv
            .smembers(&keys::completed(&self.execution_id))
            .await?;
        Ok(members.iter().any(|member| member == node_id.as_str()))
    }

    // ── loop context ────────────────────────────────────────────────────

    /// Persist a loop's iteration context.
    pub async fn save_loop_context(
        &self,
        loop_id: &NodeId,
        context: &LoopContext,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(context)?;
        self.kv
            .set(&keys::loop_context(&self.execution_id, loop_id), value)
            .await
    }

    /// Load a loop's iteration context.
    pub async fn load_loop_context(
        &self,
        loop_id: &NodeId,
    ) -> Result<Option<LoopContext>, StoreError> {
        match self
            .kv
            .get(&keys::loop_context(&self.execution_id, loop_id))
            .await?
        {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Delete a loop's iteration context at loop exit.
    pub async fn delete_loop_context(&self, loop_id: &NodeId) -> Result<(), StoreError> {
        self.kv
            .delete(&keys::loop_context(&self.execution_id, loop_id))
            .await
    }

    /// Count one body completion for a loop iteration, returning the
    /// count so far. Counters are per-iteration and never reused.
    pub async fn increment_iteration_done(
        &self,
        loop_id: &NodeId,
        index: usize,
    ) -> Result<i64, StoreError> {
        self.kv
            .incr(&keys::loop_iter_done(&self.execution_id, loop_id, index))
            .await
    }

    // ── episode handle ──────────────────────────────────────────────────

    /// Cache the conversational-memory episode handle.
    pub async fn set_episode(&self, episode_id: &str) -> Result<(), StoreError> {
        self.kv
            .set(
                &keys::episode(&self.execution_id),
                serde_json::Value::String(episode_id.to_string()),
            )
            .await
    }

    /// Read the cached episode handle.
    pub async fn episode(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .kv
            .get(&keys::episode(&self.execution_id))
            .await?
            .and_then(|value| value.as_str().map(ToString::to_string)))
    }

    // ── events & cleanup ────────────────────────────────────────────────

    /// Publish an event on the execution channel and mirror it on the
    /// workflow channel. Best-effort: failures are logged, never raised.
    pub async fn publish(&self, event: &ExecutionEvent) {
        let message = match serde_json::to_value(event) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(%error, "failed to encode event");
                return;
            }
        };
        for channel in [
            keys::execution_channel(&self.execution_id),
            keys::workflow_channel(&self.workflow_slug),
        ] {
            if let Err(error) = self.kv.publish(&channel, message.clone()).await {
                tracing::warn!(%error, channel, "event publish failed");
            }
        }
    }

    /// Delete every coordination key of this execution.
    ///
    /// Runs after any terminal transition; deleting an already-cleaned
    /// execution is a no-op.
    pub async fn cleanup(&self) -> Result<(), StoreError> {
        let pattern = keys::cleanup_pattern(&self.execution_id);
        let keys = self.kv.keys(&pattern).await?;
        let count = keys.len();
        for key in keys {
            self.kv.delete(&key).await?;
        }
        tracing::debug!(
            execution_id = %self.execution_id,
            deleted = count,
            "coordination keys cleaned"
        );
        Ok(())
    }
}

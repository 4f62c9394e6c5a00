//! Loop iteration: seeding, per-iteration completion counting, and
//! advancement past the loop.
//!
//! A loop node's component returns the item list; the engine drives the
//! iterations. Body completions are counted per iteration in the KV
//! (counters are never reused across iterations), and errors inside a
//! body are captured into that iteration's results instead of aborting
//! the loop.

use std::time::Duration;

use conflux_coordinator::{ExecutionCoordinator, LoopContext};
use conflux_core::NodeId;
use conflux_state::{LoopScope, WorkflowState};
use conflux_store::ExecutionRecord;
use conflux_topology::Topology;
use serde_json::{json, Value};

use crate::error::EngineError;
use crate::orchestrator::Orchestrator;

impl Orchestrator {
    /// First entry into a loop node: store the iteration context and
    /// fan the first iteration's body out. An item-less loop (or one
    /// without body edges) is a no-op that advances normally with an
    /// empty results list.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn seed_loop(
        &self,
        record: &ExecutionRecord,
        coord: &ExecutionCoordinator,
        topology: &Topology,
        loop_id: &NodeId,
        items: &[Value],
        state: &mut WorkflowState,
        delay: Option<Duration>,
    ) -> Result<(), EngineError> {
        let body_targets = topology.body_targets(loop_id).to_vec();
        if items.is_empty() || body_targets.is_empty() {
            state
                .node_outputs
                .insert(loop_id.as_str().to_string(), json!({ "results": [] }));
            coord.save_state(state).await?;
            return self.advance(record, coord, topology, loop_id, state, delay).await;
        }

        let context = LoopContext::new(items.to_vec(), body_targets);
        coord.save_loop_context(loop_id, &context).await?;
        tracing::info!(
            execution_id = %record.execution_id,
            %loop_id,
            items = context.items.len(),
            "loop seeded"
        );
        self.enter_iteration(coord, loop_id, &context, state, delay)
            .await?;

        // release the loop node's own token; the body jobs hold theirs
        let remaining = coord.decrement_inflight().await?;
        if remaining <= 0 {
            self.finalize(&record.execution_id).await?;
        }
        Ok(())
    }

    /// Expose the current iteration to body nodes and enqueue the body
    /// entry jobs.
    async fn enter_iteration(
        &self,
        coord: &ExecutionCoordinator,
        loop_id: &NodeId,
        context: &LoopContext,
        state: &mut WorkflowState,
        delay: Option<Duration>,
    ) -> Result<(), EngineError> {
        let item = context
            .current_item()
            .cloned()
            .ok_or_else(|| EngineError::MissingState(format!("loop {loop_id} item")))?;
        state.loop_scope = Some(LoopScope {
            index: context.index,
            item,
            items: context.items.clone(),
        });
        coord.save_state(state).await?;

        for target in &context.body_targets {
            self.spawn_node(coord, target, delay).await?;
        }
        Ok(())
    }

    /// A loop-body node finished: count it against the current
    /// iteration and move to the next iteration once every completion
    /// node has reported.
    pub(crate) async fn handle_loop_body_completion(
        &self,
        coord: &ExecutionCoordinator,
        topology: &Topology,
        loop_id: &NodeId,
    ) -> Result<(), EngineError> {
        let Some(context) = coord.load_loop_context(loop_id).await? else {
            tracing::warn!(%loop_id, "body completion without loop context");
            return Ok(());
        };

        let done = coord
            .increment_iteration_done(loop_id, context.index)
            .await?;
        let threshold = topology.iteration_threshold(loop_id) as i64;
        tracing::debug!(%loop_id, iteration = context.index, done, threshold, "loop body completion");
        if done >= threshold {
            self.loop_next_iteration(coord, topology, loop_id, context)
                .await?;
        }
        Ok(())
    }

    /// Snapshot the finished iteration, then either seed the next one
    /// or close the loop and advance past it.
    async fn loop_next_iteration(
        &self,
        coord: &ExecutionCoordinator,
        topology: &Topology,
        loop_id: &NodeId,
        mut context: LoopContext,
    ) -> Result<(), EngineError> {
        let mut state = coord
            .load_state()
            .await?
            .ok_or_else(|| EngineError::MissingState(format!("state for loop {loop_id}")))?;

        // iteration snapshot: each body target's output, plus captured
        // errors; errors are iteration-scoped and cleared here
        let mut snapshot = serde_json::Map::new();
        for target in &context.body_targets {
            if let Some(output) = state.node_outputs.get(target.as_str()) {
                snapshot.insert(target.as_str().to_string(), output.clone());
            }
        }
        if let Some(errors) = state.loop_errors.remove(loop_id.as_str()) {
            snapshot.insert("_errors".to_string(), errors);
        }
        context.results.push(Value::Object(snapshot));
        context.index += 1;

        if context.is_exhausted() {
            state.loop_scope = None;
            state.node_outputs.insert(
                loop_id.as_str().to_string(),
                json!({ "results": context.results }),
            );
            coord.save_state(&state).await?;
            coord.delete_loop_context(loop_id).await?;
            coord.mark_completed(loop_id).await?;
            tracing::info!(%loop_id, iterations = context.index, "loop completed");
            self.enqueue_successors(coord, topology, loop_id, &state, None)
                .await?;
        } else {
            coord.save_loop_context(loop_id, &context).await?;
            self.enter_iteration(coord, loop_id, &context, &mut state, None)
                .await?;
        }
        Ok(())
    }
}

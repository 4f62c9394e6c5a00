//! Execution start, advancement, finalization, and resume.

use std::time::Duration;

use chrono::Utc;
use conflux_coordinator::{ExecutionCoordinator, ExecutionEvent};
use conflux_core::constants::END_TARGET;
use conflux_core::{ExecutionId, ExecutionStatus, NodeId};
use conflux_state::WorkflowState;
use conflux_store::Job;
use conflux_topology::{EdgeKind, Topology, TopologyBuilder};
use serde_json::Value;

use crate::error::EngineError;
use crate::orchestrator::Orchestrator;

impl Orchestrator {
    /// Queue entry point: start a pending execution.
    ///
    /// Builds the trigger-scoped topology, seeds state from the trigger
    /// payload, transitions to running, and enqueues every entry node
    /// with an inflight token each. Duplicate delivery is a no-op via
    /// the pending-status check.
    pub async fn start_execution(&self, execution_id: &ExecutionId) -> Result<(), EngineError> {
        let Some(mut record) = self.repo.execution(execution_id).await? else {
            tracing::warn!(%execution_id, "start requested for unknown execution");
            return Ok(());
        };
        if record.status != ExecutionStatus::Pending {
            tracing::warn!(%execution_id, status = %record.status, "execution is not pending");
            return Ok(());
        }

        let Some(workflow) = self.repo.workflow(&record.workflow_id).await? else {
            self.fail_execution(execution_id, "workflow not found").await?;
            return Ok(());
        };
        if !workflow.is_active {
            self.fail_execution(execution_id, "workflow is inactive").await?;
            return Ok(());
        }

        let topology =
            match TopologyBuilder::build(&workflow.graph, record.trigger_node_id.as_ref()) {
                Ok(topology) => topology,
                Err(build_error) => {
                    self.fail_execution(
                        execution_id,
                        &format!("topology build failed: {build_error}"),
                    )
                    .await?;
                    return Ok(());
                }
            };

        let coord = self.coordinator(&record);
        coord.save_topology(&topology).await?;

        let state = WorkflowState::from_trigger(
            execution_id.to_string(),
            record.trigger_payload.clone(),
            &record.user_profile_id,
        );
        coord.save_state(&state).await?;

        record.transition(ExecutionStatus::Running)?;
        self.repo.update_execution(&record).await?;
        coord
            .publish(&ExecutionEvent::ExecutionStarted {
                execution_id: execution_id.to_string(),
                workflow_slug: record.workflow_id.as_str().to_string(),
            })
            .await;
        tracing::info!(%execution_id, workflow = %record.workflow_id, "execution started");

        if let Some(episodes) = &self.episodes {
            match episodes
                .start_episode(execution_id, &record.user_profile_id)
                .await
            {
                Ok(episode_id) => {
                    if let Err(cache_error) = coord.set_episode(&episode_id).await {
                        tracing::warn!(%cache_error, "episode handle not cached");
                    }
                }
                Err(episode_error) => {
                    tracing::warn!(%episode_error, "episode start failed");
                }
            }
        }

        for entry in &topology.entry_node_ids {
            self.spawn_node(&coord, entry, None).await?;
        }
        if topology.entry_node_ids.is_empty() {
            // nothing to run: a trigger with no downstream nodes
            self.finalize(execution_id).await?;
        }
        Ok(())
    }

    /// Advance past a completed node: route to successors (or run the
    /// loop completion check), release the node's inflight token, and
    /// finalize once the counter drains.
    pub(crate) async fn advance(
        &self,
        record: &conflux_store::ExecutionRecord,
        coord: &ExecutionCoordinator,
        topology: &Topology,
        node_id: &NodeId,
        state: &WorkflowState,
        delay: Option<Duration>,
    ) -> Result<(), EngineError> {
        if let Some(loop_id) = topology.loop_containing(node_id).cloned() {
            // body-internal edges route normally; a dead end closes the
            // cycle back to the loop head (its loop-return edge is not
            // traversable), so it reports iteration progress instead
            let enqueued = self
                .enqueue_successors(coord, topology, node_id, state, delay)
                .await?;
            if enqueued == 0 {
                self.handle_loop_body_completion(coord, topology, &loop_id)
                    .await?;
            }
        } else {
            if !coord.mark_completed(node_id).await? {
                // duplicate advance: the first delivery already routed
                // successors and released the token
                tracing::warn!(%node_id, "duplicate advance ignored");
                return Ok(());
            }
            self.enqueue_successors(coord, topology, node_id, state, delay)
                .await?;
        }

        let remaining = coord.decrement_inflight().await?;
        if remaining <= 0 {
            self.finalize(&record.execution_id).await?;
        }
        Ok(())
    }

    /// Route a completed node's outbound edges and enqueue the chosen
    /// targets. Returns how many nodes were enqueued.
    ///
    /// Conditional edges match on `state.route == condition_value`; all
    /// matching edges fire. Fan-in targets are armed instead of
    /// enqueued until their last parent arrives. The `__end__` sentinel
    /// contributes nothing.
    pub(crate) async fn enqueue_successors(
        &self,
        coord: &ExecutionCoordinator,
        topology: &Topology,
        node_id: &NodeId,
        state: &WorkflowState,
        delay: Option<Duration>,
    ) -> Result<usize, EngineError> {
        let mut enqueued = 0;
        for edge in topology.edges_from(node_id) {
            match &edge.kind {
                EdgeKind::Direct => {}
                EdgeKind::Conditional { condition_value } => {
                    if state.route != *condition_value {
                        continue;
                    }
                }
            }
            let target = &edge.target_node_id;
            if target.as_str() == END_TARGET {
                continue;
            }

            if topology.is_fan_in(target) {
                let arrivals = coord.arm_fanin(target).await?;
                if arrivals >= i64::from(topology.incoming(target)) {
                    coord.clear_fanin(target).await?;
                    self.spawn_node(coord, target, delay).await?;
                    enqueued += 1;
                } else {
                    tracing::debug!(
                        target = %target,
                        arrivals,
                        needed = topology.incoming(target),
                        "fan-in waiting for remaining parents"
                    );
                }
            } else {
                self.spawn_node(coord, target, delay).await?;
                enqueued += 1;
            }
        }
        Ok(enqueued)
    }

    /// Take an inflight token and enqueue a node job, honoring a delay
    /// hint.
    pub(crate) async fn spawn_node(
        &self,
        coord: &ExecutionCoordinator,
        node_id: &NodeId,
        delay: Option<Duration>,
    ) -> Result<(), EngineError> {
        coord.increment_inflight().await?;
        let job = Job::ExecuteNode {
            execution_id: *coord.execution_id(),
            node_id: node_id.clone(),
            retry_count: 0,
        };
        match delay {
            Some(delay) if !delay.is_zero() => self.queue.enqueue_in(delay, job).await?,
            _ => self.queue.enqueue(job).await?,
        }
        Ok(())
    }

    /// Finalize a drained execution: extract the final output, persist
    /// totals, notify collaborators, wake a waiting parent, and always
    /// clean the coordination keys.
    ///
    /// Idempotent: terminal executions are left alone.
    pub async fn finalize(&self, execution_id: &ExecutionId) -> Result<(), EngineError> {
        let Some(record) = self.repo.execution(execution_id).await? else {
            return Ok(());
        };
        if record.status.is_terminal() {
            return Ok(());
        }
        if record.status == ExecutionStatus::Interrupted {
            // inflight drained while a confirmation is pending; the
            // resume will re-arm the counter
            return Ok(());
        }

        let coord = self.coordinator(&record);
        let outcome = self.finalize_inner(record, &coord).await;

        // cleanup runs whatever happened above
        if let Err(cleanup_error) = coord.cleanup().await {
            tracing::warn!(%cleanup_error, "cleanup failed during finalization");
        }

        if let Err(finalize_error) = outcome {
            self.fail_execution(
                execution_id,
                &format!("Finalization error: {finalize_error}"),
            )
            .await?;
        }
        Ok(())
    }

    async fn finalize_inner(
        &self,
        mut record: conflux_store::ExecutionRecord,
        coord: &ExecutionCoordinator,
    ) -> Result<(), EngineError> {
        let state = coord.load_state().await?;
        let final_output = state.as_ref().and_then(WorkflowState::final_output);

        record.transition(ExecutionStatus::Completed)?;
        record.final_output = final_output.clone();
        if let Some(state) = &state {
            record.usage = state.token_usage;
        }
        self.repo.update_execution(&record).await?;
        tracing::info!(execution_id = %record.execution_id, "execution completed");

        if let Some(episodes) = &self.episodes {
            if let Ok(Some(episode_id)) = coord.episode().await {
                if let Err(episode_error) = episodes.complete_episode(&episode_id).await {
                    tracing::warn!(%episode_error, "episode completion failed");
                }
            }
        }

        coord
            .publish(&ExecutionEvent::ExecutionCompleted {
                execution_id: record.execution_id.to_string(),
                final_output: final_output.clone(),
            })
            .await;

        if let Some(delivery) = &self.delivery {
            if let Err(delivery_error) = delivery.deliver(&record).await {
                tracing::warn!(%delivery_error, "output delivery failed");
            }
        }

        if let (Some(parent), Some(parent_node)) =
            (record.parent_execution_id, record.parent_node_id.clone())
        {
            self.resume_from_child(
                &parent,
                &parent_node,
                final_output.unwrap_or(Value::Null),
            )
            .await?;
        }
        Ok(())
    }

    /// Resume an interrupted execution with the user's reply.
    ///
    /// Writes the reply into state, consumes the pending task, and
    /// re-enqueues the interrupted node. Expired confirmations fail the
    /// execution instead.
    pub async fn resume_node(
        &self,
        execution_id: &ExecutionId,
        user_input: &str,
    ) -> Result<(), EngineError> {
        let Some(mut record) = self.repo.execution(execution_id).await? else {
            tracing::warn!(%execution_id, "resume requested for unknown execution");
            return Ok(());
        };
        if record.status != ExecutionStatus::Interrupted {
            tracing::warn!(%execution_id, status = %record.status, "cannot resume");
            return Ok(());
        }
        let Some(task) = self.repo.pending_task_for(execution_id).await? else {
            tracing::warn!(%execution_id, "no pending task to resume");
            return Ok(());
        };

        if task.is_expired(Utc::now()) {
            self.repo.delete_pending_task(&task.task_id).await?;
            self.fail_execution(execution_id, "confirmation timed out")
                .await?;
            return Ok(());
        }

        let coord = self.coordinator(&record);
        let mut state = coord
            .load_state()
            .await?
            .ok_or_else(|| EngineError::MissingState(format!("state for {execution_id}")))?;
        state.resume_input = Some(user_input.to_string());
        coord.save_state(&state).await?;

        self.repo.delete_pending_task(&task.task_id).await?;
        record.transition(ExecutionStatus::Running)?;
        self.repo.update_execution(&record).await?;

        coord.increment_inflight().await?;
        self.queue
            .enqueue(Job::ExecuteNode {
                execution_id: *execution_id,
                node_id: task.node_id,
                retry_count: 0,
            })
            .await?;
        Ok(())
    }
}

//! The node job worker.
//!
//! Every exit path either releases the job's inflight token or leaves
//! it to a replacement job (retry, resume). Duplicate deliveries of an
//! already-completed node never owned a token and exit without touching
//! the counter.

use chrono::Utc;
use conflux_component::ComponentError;
use conflux_coordinator::{ExecutionCoordinator, ExecutionEvent};
use conflux_core::constants::PREVIEW_MAX_LEN;
use conflux_core::{ExecutionId, ExecutionStatus, NodeId, NodeRunStatus, TaskId};
use conflux_state::{NodeResult, WorkflowState};
use conflux_store::{ExecutionLogEntry, ExecutionRecord, Job, PendingTask, WorkflowRecord};
use conflux_topology::NodeSpec;
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::budget;
use crate::error::EngineError;
use crate::orchestrator::Orchestrator;

impl Orchestrator {
    /// Queue entry point: run one node attempt.
    pub async fn execute_node_job(
        &self,
        execution_id: &ExecutionId,
        node_id: &NodeId,
        retry_count: u32,
    ) -> Result<(), EngineError> {
        // preflight: only live executions run nodes
        let Some(record) = self.repo.execution(execution_id).await? else {
            tracing::warn!(%execution_id, "node job for unknown execution");
            return Ok(());
        };
        if record.status.is_terminal() {
            // cancellation and late deliveries land here; coordination
            // keys are already cleaned
            tracing::debug!(%execution_id, status = %record.status, "node job after terminal status");
            return Ok(());
        }
        let coord = self.coordinator(&record);
        if !record.status.is_runnable() {
            let remaining = coord.decrement_inflight().await?;
            if remaining <= 0 {
                self.finalize(execution_id).await?;
            }
            return Ok(());
        }

        // topology must exist for a live execution
        let Some(topology) = coord.load_topology().await? else {
            tracing::error!(%execution_id, "topology missing for live execution");
            coord.decrement_inflight().await?;
            return Ok(());
        };
        let Some(spec) = topology.node(node_id).cloned() else {
            tracing::error!(%execution_id, %node_id, "node missing from topology");
            let remaining = coord.decrement_inflight().await?;
            if remaining <= 0 {
                self.finalize(execution_id).await?;
            }
            return Ok(());
        };

        // duplicate delivery of a completed node: full no-op
        if topology.loop_containing(node_id).is_none() && coord.is_completed(node_id).await? {
            tracing::warn!(%execution_id, %node_id, "duplicate node delivery ignored");
            return Ok(());
        }

        let mut state = coord
            .load_state()
            .await?
            .ok_or_else(|| EngineError::MissingState(format!("state for {execution_id}")))?;

        // interrupt-before gate; a resume (input present) passes through
        if spec.interrupt_before && state.resume_input.is_none() {
            self.interrupt(&record, &coord, node_id, "Confirmation required.")
                .await?;
            coord.decrement_inflight().await?;
            return Ok(());
        }

        let Some(workflow) = self.repo.workflow(&record.workflow_id).await? else {
            return Err(EngineError::WorkflowNotFound(record.workflow_id.clone()));
        };

        coord
            .publish(&ExecutionEvent::NodeStatus {
                execution_id: execution_id.to_string(),
                node_id: node_id.to_string(),
                status: NodeRunStatus::Running,
                duration_ms: None,
                output: None,
                error: None,
            })
            .await;

        let started_at = Utc::now();
        let timer = Instant::now();
        let invocation = self.invoke_component(&record, &spec, node_id, &state).await;
        let duration_ms = timer.elapsed().as_millis() as u64;

        match invocation {
            Ok(result) => {
                self.apply_success(
                    &record, &coord, &topology, &workflow, node_id, &spec, &mut state, result,
                    started_at, duration_ms,
                )
                .await
            }
            Err(error) => {
                self.apply_failure(
                    &record, &coord, &topology, node_id, &spec, &mut state, &error, retry_count,
                    started_at, duration_ms,
                )
                .await
            }
        }
    }

    /// Resolve and run the node's component.
    async fn invoke_component(
        &self,
        record: &ExecutionRecord,
        spec: &NodeSpec,
        node_id: &NodeId,
        state: &WorkflowState,
    ) -> Result<NodeResult, ComponentError> {
        let config = match &spec.component_config_id {
            Some(config_id) => self
                .repo
                .component_config(config_id)
                .await
                .map_err(|error| ComponentError::Permanent(error.to_string()))?
                .ok_or_else(|| {
                    ComponentError::InvalidConfig(format!("config {config_id} not found"))
                })?,
            None => json!({}),
        };

        if spec.component_type == "subworkflow" {
            return self
                .run_subworkflow_node(record, node_id, &config, state)
                .await;
        }

        let factory = self.registry.resolve(&spec.component_type)?;
        let component = factory.create(&config)?;
        component.invoke(state).await
    }

    /// Successful attempt: apply the result, persist, log, enforce the
    /// budget, then interrupt / suspend / seed / advance as signalled.
    #[allow(clippy::too_many_arguments)]
    async fn apply_success(
        &self,
        record: &ExecutionRecord,
        coord: &ExecutionCoordinator,
        topology: &conflux_topology::Topology,
        workflow: &WorkflowRecord,
        node_id: &NodeId,
        spec: &NodeSpec,
        state: &mut WorkflowState,
        result: NodeResult,
        started_at: chrono::DateTime<Utc>,
        duration_ms: u64,
    ) -> Result<(), EngineError> {
        // the resume reply is consumed by exactly one attempt
        let resumed = state.take_resume_input().is_some();
        state.apply(node_id, &result);
        coord.save_state(state).await?;

        let output_preview = preview(&Value::Object(result.port_data.clone()));
        self.repo
            .append_log(ExecutionLogEntry {
                execution_id: record.execution_id,
                node_id: node_id.clone(),
                status: NodeRunStatus::Completed,
                duration_ms,
                started_at,
                output: Some(output_preview.clone()),
                error: None,
                error_code: None,
            })
            .await?;
        coord
            .publish(&ExecutionEvent::NodeStatus {
                execution_id: record.execution_id.to_string(),
                node_id: node_id.to_string(),
                status: NodeRunStatus::Completed,
                duration_ms: Some(duration_ms),
                output: Some(output_preview),
                error: None,
            })
            .await;

        if let Some(reason) = self.check_budget(record, workflow, state).await? {
            self.fail_execution(&record.execution_id, &reason).await?;
            return Ok(());
        }

        // component-signalled interrupt, or the node's interrupt-after flag
        if let Some(signal) = &result.interrupt {
            self.interrupt(record, coord, node_id, &signal.prompt).await?;
            coord.decrement_inflight().await?;
            return Ok(());
        }
        if spec.interrupt_after && !resumed {
            self.interrupt(record, coord, node_id, "Confirmation required.")
                .await?;
            coord.decrement_inflight().await?;
            return Ok(());
        }

        // sub-workflow suspend: the token is released and the node is
        // re-queued by resume_from_child; finalize must not run while
        // the parent waits
        if let Some(wait) = &result.subworkflow {
            tracing::info!(
                execution_id = %record.execution_id,
                %node_id,
                child = %wait.child_execution_id,
                "node waiting for child execution"
            );
            coord
                .publish(&ExecutionEvent::NodeStatus {
                    execution_id: record.execution_id.to_string(),
                    node_id: node_id.to_string(),
                    status: NodeRunStatus::Waiting,
                    duration_ms: Some(duration_ms),
                    output: None,
                    error: None,
                })
                .await;
            coord.decrement_inflight().await?;
            return Ok(());
        }

        if let Some(seed) = &result.loop_seed {
            return self
                .seed_loop(record, coord, topology, node_id, &seed.items, state, result.delay)
                .await;
        }

        self.advance(record, coord, topology, node_id, state, result.delay)
            .await
    }

    /// Failed attempt: log, then retry with backoff, capture loop-body
    /// errors, or fail the execution.
    #[allow(clippy::too_many_arguments)]
    async fn apply_failure(
        &self,
        record: &ExecutionRecord,
        coord: &ExecutionCoordinator,
        topology: &conflux_topology::Topology,
        node_id: &NodeId,
        spec: &NodeSpec,
        state: &mut WorkflowState,
        error: &ComponentError,
        retry_count: u32,
        started_at: chrono::DateTime<Utc>,
        duration_ms: u64,
    ) -> Result<(), EngineError> {
        let error_text: String = error.to_string().chars().take(PREVIEW_MAX_LEN).collect();
        self.repo
            .append_log(ExecutionLogEntry {
                execution_id: record.execution_id,
                node_id: node_id.clone(),
                status: NodeRunStatus::Failed,
                duration_ms,
                started_at,
                output: None,
                error: Some(error_text.clone()),
                error_code: Some(error.code().to_string()),
            })
            .await?;
        coord
            .publish(&ExecutionEvent::NodeStatus {
                execution_id: record.execution_id.to_string(),
                node_id: node_id.to_string(),
                status: NodeRunStatus::Failed,
                duration_ms: Some(duration_ms),
                output: None,
                error: Some(error_text.clone()),
            })
            .await;

        let max_retries = self.retry.max_retries_for(spec.max_retries);
        if error.is_retryable() && retry_count < max_retries {
            let delay = self.retry.delay_for(retry_count);
            tracing::warn!(
                execution_id = %record.execution_id,
                %node_id,
                retry_count,
                delay_ms = delay.as_millis() as u64,
                "transient node failure, retrying"
            );
            // the replacement job takes its token before this one is
            // released, so the counter never dips to zero in between
            coord.increment_inflight().await?;
            self.queue
                .enqueue_in(
                    delay,
                    Job::ExecuteNode {
                        execution_id: record.execution_id,
                        node_id: node_id.clone(),
                        retry_count: retry_count + 1,
                    },
                )
                .await?;
            coord.decrement_inflight().await?;
            return Ok(());
        }

        // loop bodies absorb permanent errors: the iteration records
        // them and continues
        if let Some(loop_id) = topology.loop_containing(node_id).cloned() {
            let entry = state
                .loop_errors
                .entry(loop_id.as_str().to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if let Value::Object(errors) = entry {
                errors.insert(
                    node_id.as_str().to_string(),
                    json!({"error": error_text, "error_code": error.code()}),
                );
            }
            coord.save_state(state).await?;
            return self.advance(record, coord, topology, node_id, state, None).await;
        }

        self.fail_execution(
            &record.execution_id,
            &format!("node {node_id} failed: {error}"),
        )
        .await
    }

    /// Park the execution on a pending confirmation task.
    pub(crate) async fn interrupt(
        &self,
        record: &ExecutionRecord,
        coord: &ExecutionCoordinator,
        node_id: &NodeId,
        prompt: &str,
    ) -> Result<(), EngineError> {
        let task = PendingTask {
            task_id: TaskId::generate(),
            execution_id: record.execution_id,
            node_id: node_id.clone(),
            prompt: prompt.to_string(),
            chat_id: record.trigger_payload.get("chat_id").and_then(Value::as_i64),
            expires_at: Utc::now()
                + chrono::Duration::from_std(self.confirmation_timeout)
                    .unwrap_or_else(|_| chrono::Duration::hours(1)),
        };
        self.repo.create_pending_task(task.clone()).await?;

        let mut record = record.clone();
        record.transition(ExecutionStatus::Interrupted)?;
        self.repo.update_execution(&record).await?;
        tracing::info!(
            execution_id = %record.execution_id,
            %node_id,
            task_id = %task.task_id,
            "execution interrupted"
        );

        coord
            .publish(&ExecutionEvent::ExecutionInterrupted {
                execution_id: record.execution_id.to_string(),
                node_id: node_id.to_string(),
                prompt: prompt.to_string(),
                task_id: task.task_id.to_string(),
            })
            .await;
        Ok(())
    }

    /// Enforce per-execution and per-epic budget limits.
    async fn check_budget(
        &self,
        record: &ExecutionRecord,
        workflow: &WorkflowRecord,
        state: &WorkflowState,
    ) -> Result<Option<String>, EngineError> {
        let limits = workflow.budget;
        if limits.is_unlimited() {
            return Ok(None);
        }
        if let Some(reason) = budget::execution_overrun(&limits, &state.token_usage) {
            return Ok(Some(reason));
        }
        if let Some(epic_id) = &record.epic_id {
            if limits.epic_max_cost_usd.is_some() {
                // persisted totals of sibling executions plus this one's
                // live usage
                let mut total = self.repo.epic_usage(epic_id).await?;
                total.merge(&state.token_usage);
                if let Some(reason) = budget::epic_overrun(&limits, &total) {
                    return Ok(Some(reason));
                }
            }
        }
        Ok(None)
    }
}

/// Clamp a value for event payloads and log rows.
pub(crate) fn preview(value: &Value) -> Value {
    let rendered = match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    if rendered.chars().count() <= PREVIEW_MAX_LEN {
        value.clone()
    } else {
        let truncated: String = rendered.chars().take(PREVIEW_MAX_LEN).collect();
        Value::String(format!("{truncated}…"))
    }
}

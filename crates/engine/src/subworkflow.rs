//! Sub-workflow suspend and resume.
//!
//! A `subworkflow` node runs in two invocations. The first creates the
//! child execution and suspends its own execution token. The second,
//! enqueued by [`Orchestrator::resume_from_child`] once the child
//! finalizes, finds the child's output in state and completes
//! normally. Components stay stateless; the continuation lives in the
//! state blob.

use conflux_component::{rules, ComponentError};
use conflux_core::{ExecutionId, ExecutionStatus, NodeId, WorkflowId};
use conflux_state::{NodeResult, WorkflowState};
use conflux_store::{ExecutionRecord, Job};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::EngineError;
use crate::orchestrator::Orchestrator;

#[derive(Debug, Deserialize)]
struct SubworkflowConfig {
    /// Target workflow slug.
    workflow: String,
    /// Child trigger node, when the child should be scoped to one.
    #[serde(default)]
    trigger_node: Option<String>,
    /// Map of child payload key to dotted path into the parent state.
    #[serde(default)]
    input_mapping: Option<Map<String, Value>>,
}

impl Orchestrator {
    /// The engine-side behavior of a `subworkflow` node.
    pub(crate) async fn run_subworkflow_node(
        &self,
        record: &ExecutionRecord,
        node_id: &NodeId,
        config: &Value,
        state: &WorkflowState,
    ) -> Result<NodeResult, ComponentError> {
        // second invocation: the child's output is waiting for us
        if let Some(output) = state.subworkflow_results.get(node_id.as_str()) {
            return Ok(NodeResult::output(output.clone()));
        }

        let config: SubworkflowConfig = serde_json::from_value(config.clone())
            .map_err(|error| ComponentError::InvalidConfig(error.to_string()))?;
        let child_id = self
            .create_child_execution(record, node_id, &config, state)
            .await
            .map_err(|error| ComponentError::Permanent(error.to_string()))?;
        Ok(NodeResult::wait_for(child_id))
    }

    /// Create and enqueue the child execution of a sub-workflow node.
    async fn create_child_execution(
        &self,
        parent: &ExecutionRecord,
        parent_node: &NodeId,
        config: &SubworkflowConfig,
        state: &WorkflowState,
    ) -> Result<ExecutionId, EngineError> {
        let slug = WorkflowId::new(config.workflow.clone());
        let Some(workflow) = self.repo.workflow(&slug).await? else {
            return Err(EngineError::WorkflowNotFound(slug));
        };
        if !workflow.is_active {
            return Err(EngineError::WorkflowInactive(slug));
        }

        let payload = build_child_payload(config.input_mapping.as_ref(), state)?;
        let mut child = ExecutionRecord::new(
            slug,
            parent.user_profile_id.clone(),
            payload,
        )
        .with_parent(parent.execution_id, parent_node.clone());
        if let Some(trigger) = &config.trigger_node {
            child = child.with_trigger_node(NodeId::new(trigger.clone()));
        }
        if let Some(epic) = &parent.epic_id {
            child = child.with_epic(epic.clone());
        }

        let child_id = child.execution_id;
        self.repo.create_execution(child).await?;
        self.queue
            .enqueue(Job::StartExecution {
                execution_id: child_id,
            })
            .await?;
        tracing::info!(
            parent = %parent.execution_id,
            %parent_node,
            child = %child_id,
            "child execution created"
        );
        Ok(child_id)
    }

    /// Deliver a finalized child's output to its waiting parent node
    /// and re-enqueue it. Exactly one re-queue per child completion; a
    /// parent that died while waiting is left alone.
    pub async fn resume_from_child(
        &self,
        parent_execution_id: &ExecutionId,
        parent_node_id: &NodeId,
        child_output: Value,
    ) -> Result<(), EngineError> {
        let Some(record) = self.repo.execution(parent_execution_id).await? else {
            tracing::warn!(%parent_execution_id, "child completed for unknown parent");
            return Ok(());
        };
        if record.status != ExecutionStatus::Running {
            tracing::warn!(
                %parent_execution_id,
                status = %record.status,
                "parent no longer running; child output dropped"
            );
            return Ok(());
        }

        let coord = self.coordinator(&record);
        let mut state = coord.load_state().await?.ok_or_else(|| {
            EngineError::MissingState(format!("state for {parent_execution_id}"))
        })?;
        state
            .subworkflow_results
            .insert(parent_node_id.as_str().to_string(), child_output);
        coord.save_state(&state).await?;

        coord.increment_inflight().await?;
        self.queue
            .enqueue(Job::ExecuteNode {
                execution_id: *parent_execution_id,
                node_id: parent_node_id.clone(),
                retry_count: 0,
            })
            .await?;
        Ok(())
    }
}

/// Build the child trigger payload.
///
/// With a mapping, each entry resolves a dotted path into the parent
/// state (missing paths become null). The default passes the parent's
/// trigger and node outputs through.
fn build_child_payload(
    mapping: Option<&Map<String, Value>>,
    state: &WorkflowState,
) -> Result<Value, EngineError> {
    let Some(mapping) = mapping else {
        return Ok(json!({
            "trigger": state.trigger,
            "node_outputs": state.node_outputs,
        }));
    };

    let state_value = serde_json::to_value(state).map_err(conflux_state::StateError::from)?;
    let mut payload = Map::new();
    for (key, path) in mapping {
        let resolved = path
            .as_str()
            .and_then(|path| rules::lookup_path(&state_value, path))
            .cloned()
            .unwrap_or(Value::Null);
        payload.insert(key.clone(), resolved);
    }
    Ok(Value::Object(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::UserId;

    fn state() -> WorkflowState {
        let mut state = WorkflowState::from_trigger(
            "parent-1",
            json!({"text": "hello", "chat_id": 9}),
            &UserId::new("u1"),
        );
        state
            .node_outputs
            .insert("agent_1".into(), json!({"output": "classified"}));
        state
    }

    #[test]
    fn default_payload_passes_trigger_and_outputs() {
        let payload = build_child_payload(None, &state()).unwrap();
        assert_eq!(payload["trigger"]["text"], json!("hello"));
        assert_eq!(
            payload["node_outputs"]["agent_1"],
            json!({"output": "classified"})
        );
    }

    #[test]
    fn mapping_resolves_dotted_paths() {
        let mut mapping = Map::new();
        mapping.insert("text".into(), json!("trigger.text"));
        mapping.insert("category".into(), json!("node_outputs.agent_1.output"));
        mapping.insert("missing".into(), json!("node_outputs.ghost.value"));

        let payload = build_child_payload(Some(&mapping), &state()).unwrap();
        assert_eq!(payload["text"], json!("hello"));
        assert_eq!(payload["category"], json!("classified"));
        assert_eq!(payload["missing"], Value::Null);
    }
}

//! The transactional record store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conflux_core::{EpicId, ExecutionId, ExecutionStatus, TaskId, WorkflowId};
use conflux_state::TokenUsage;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::StoreError;
use crate::record::{ExecutionLogEntry, ExecutionRecord, PendingTask, WorkflowRecord};

/// Durable records: executions, per-attempt logs, pending confirmation
/// tasks, workflows, and component configurations.
///
/// The orchestrator scopes its record access per worker call; there are
/// no cross-call transactions.
#[async_trait]
pub trait ExecutionRepo: Send + Sync {
    /// Store a workflow record.
    async fn insert_workflow(&self, workflow: WorkflowRecord) -> Result<(), StoreError>;

    /// Look up a workflow by slug.
    async fn workflow(&self, id: &WorkflowId) -> Result<Option<WorkflowRecord>, StoreError>;

    /// Create an execution record.
    async fn create_execution(&self, execution: ExecutionRecord) -> Result<(), StoreError>;

    /// Look up an execution.
    async fn execution(
        &self,
        id: &ExecutionId,
    ) -> Result<Option<ExecutionRecord>, StoreError>;

    /// Persist an updated execution record.
    async fn update_execution(&self, execution: &ExecutionRecord) -> Result<(), StoreError>;

    /// Append a node-attempt log row.
    async fn append_log(&self, entry: ExecutionLogEntry) -> Result<(), StoreError>;

    /// All log rows of an execution, in append order.
    async fn logs(&self, id: &ExecutionId) -> Result<Vec<ExecutionLogEntry>, StoreError>;

    /// Create an interrupt marker.
    async fn create_pending_task(&self, task: PendingTask) -> Result<(), StoreError>;

    /// The open interrupt marker of an execution, if any.
    async fn pending_task_for(
        &self,
        id: &ExecutionId,
    ) -> Result<Option<PendingTask>, StoreError>;

    /// Remove a consumed interrupt marker.
    async fn delete_pending_task(&self, task_id: &TaskId) -> Result<(), StoreError>;

    /// Store a component configuration blob.
    async fn insert_component_config(
        &self,
        config_id: &str,
        config: Value,
    ) -> Result<(), StoreError>;

    /// Look up a component configuration blob.
    async fn component_config(&self, config_id: &str) -> Result<Option<Value>, StoreError>;

    /// Running children of a parent execution.
    async fn running_children(
        &self,
        parent: &ExecutionId,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;

    /// All children of a parent execution, regardless of status.
    async fn child_executions(
        &self,
        parent: &ExecutionId,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;

    /// Running executions that started before the cutoff (zombie sweep).
    async fn running_started_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;

    /// Summed usage across all executions of an epic.
    async fn epic_usage(&self, epic_id: &EpicId) -> Result<TokenUsage, StoreError>;
}

#[derive(Default)]
struct RepoState {
    workflows: HashMap<WorkflowId, WorkflowRecord>,
    executions: HashMap<ExecutionId, ExecutionRecord>,
    logs: Vec<ExecutionLogEntry>,
    pending_tasks: HashMap<TaskId, PendingTask>,
    component_configs: HashMap<String, Value>,
}

/// In-memory [`ExecutionRepo`].
pub struct MemoryRepo {
    state: RwLock<RepoState>,
}

impl MemoryRepo {
    /// Create an empty repo.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RepoState::default()),
        }
    }
}

impl Default for MemoryRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionRepo for MemoryRepo {
    async fn insert_workflow(&self, workflow: WorkflowRecord) -> Result<(), StoreError> {
        self.state
            .write()
            .workflows
            .insert(workflow.id.clone(), workflow);
        Ok(())
    }

    async fn workflow(&self, id: &WorkflowId) -> Result<Option<WorkflowRecord>, StoreError> {
        Ok(self.state.read().workflows.get(id).cloned())
    }

    async fn create_execution(&self, execution: ExecutionRecord) -> Result<(), StoreError> {
        self.state
            .write()
            .executions
            .insert(execution.execution_id, execution);
        Ok(())
    }

    async fn execution(
        &self,
        id: &ExecutionId,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self.state.read().executions.get(id).cloned())
    }

    async fn update_execution(&self, execution: &ExecutionRecord) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if !state.executions.contains_key(&execution.execution_id) {
            return Err(StoreError::NotFound(format!(
                "execution {}",
                execution.execution_id
            )));
        }
        state
            .executions
            .insert(execution.execution_id, execution.clone());
        Ok(())
    }

    async fn append_log(&self, entry: ExecutionLogEntry) -> Result<(), StoreError> {
        self.state.write().logs.push(entry);
        Ok(())
    }

    async fn logs(&self, id: &ExecutionId) -> Result<Vec<ExecutionLogEntry>, StoreError> {
        Ok(self
            .state
            .read()
            .logs
            .iter()
            .filter(|entry| entry.execution_id == *id)
            .cloned()
            .collect())
    }

    async fn create_pending_task(&self, task: PendingTask) -> Result<(), StoreError> {
        self.state
            .write()
            .pending_tasks
            .insert(task.task_id.clone(), task);
        Ok(())
    }

    async fn pending_task_for(
        &self,
        id: &ExecutionId,
    ) -> Result<Option<PendingTask>, StoreError> {
        Ok(self
            .state
            .read()
            .pending_tasks
            .values()
            .find(|task| task.execution_id == *id)
            .cloned())
    }

    async fn delete_pending_task(&self, task_id: &TaskId) -> Result<(), StoreError> {
        self.state.write().pending_tasks.remove(task_id);
        Ok(())
    }

    async fn insert_component_config(
        &self,
        config_id: &str,
        config: Value,
    ) -> Result<(), StoreError> {
        self.state
            .write()
            .component_configs
            .insert(config_id.to_string(), config);
        Ok(())
    }

    async fn component_config(&self, config_id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.state.read().component_configs.get(config_id).cloned())
    }

    async fn running_children(
        &self,
        parent: &ExecutionId,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        Ok(self
            .state
            .read()
            .executions
            .values()
            .filter(|exec| {
                exec.parent_execution_id == Some(*parent)
                    && exec.status == ExecutionStatus::Running
            })
            .cloned()
            .collect())
    }

    async fn child_executions(
        &self,
        parent: &ExecutionId,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        Ok(self
            .state
            .read()
            .executions
            .values()
            .filter(|exec| exec.parent_execution_id == Some(*parent))
            .cloned()
            .collect())
    }

    async fn running_started_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        Ok(self
            .state
            .read()
            .executions
            .values()
            .filter(|exec| {
                exec.status == ExecutionStatus::Running
                    && exec.started_at.is_some_and(|at| at < cutoff)
            })
            .cloned()
            .collect())
    }

    async fn epic_usage(&self, epic_id: &EpicId) -> Result<TokenUsage, StoreError> {
        let state = self.state.read();
        let mut total = TokenUsage::default();
        for exec in state.executions.values() {
            if exec.epic_id.as_ref() == Some(epic_id) {
                total.merge(&exec.usage);
            }
        }
        Ok(total)
    }
}

//! Durable record types held in the transactional store.

use chrono::{DateTime, Utc};
use conflux_core::constants::ERROR_MESSAGE_MAX_LEN;
use conflux_core::{
    transition::validate_transition, EpicId, ExecutionId, ExecutionStatus, NodeId, NodeRunStatus,
    TaskId, UserId, WorkflowId,
};
use conflux_state::TokenUsage;
use conflux_topology::WorkflowGraph;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// Per-execution and per-epic budget limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetLimits {
    /// Maximum total tokens one execution may consume.
    #[serde(default)]
    pub max_total_tokens: Option<u64>,
    /// Maximum USD cost one execution may accrue.
    #[serde(default)]
    pub max_cost_usd: Option<f64>,
    /// Maximum model calls one execution may make.
    #[serde(default)]
    pub max_llm_calls: Option<u64>,
    /// Maximum USD cost across all executions of the owning epic.
    #[serde(default)]
    pub epic_max_cost_usd: Option<f64>,
}

impl BudgetLimits {
    /// Returns `true` if no limit is configured.
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.max_total_tokens.is_none()
            && self.max_cost_usd.is_none()
            && self.max_llm_calls.is_none()
            && self.epic_max_cost_usd.is_none()
    }
}

/// A stored workflow: graph records plus execution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Workflow slug (also the id).
    pub id: WorkflowId,
    /// The compiled node and edge records.
    pub graph: WorkflowGraph,
    /// Budget limits applied to each execution.
    #[serde(default)]
    pub budget: BudgetLimits,
    /// Workflow to run when an execution fails permanently.
    #[serde(default)]
    pub error_handler: Option<WorkflowId>,
    /// Inactive workflows refuse new executions.
    #[serde(default = "WorkflowRecord::default_active")]
    pub is_active: bool,
}

impl WorkflowRecord {
    fn default_active() -> bool {
        true
    }

    /// Create an active workflow record with no limits.
    #[must_use]
    pub fn new(id: WorkflowId, graph: WorkflowGraph) -> Self {
        Self {
            id,
            graph,
            budget: BudgetLimits::default(),
            error_handler: None,
            is_active: true,
        }
    }

    /// Attach budget limits.
    #[must_use]
    pub fn with_budget(mut self, budget: BudgetLimits) -> Self {
        self.budget = budget;
        self
    }

    /// Attach an error-handler workflow.
    #[must_use]
    pub fn with_error_handler(mut self, handler: WorkflowId) -> Self {
        self.error_handler = Some(handler);
        self
    }
}

/// One run of a workflow against one trigger event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Unique execution id.
    pub execution_id: ExecutionId,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    /// The trigger node this execution entered through.
    #[serde(default)]
    pub trigger_node_id: Option<NodeId>,
    /// Parent execution, for sub-workflow children.
    #[serde(default)]
    pub parent_execution_id: Option<ExecutionId>,
    /// The parent's sub-workflow node, for sub-workflow children.
    #[serde(default)]
    pub parent_node_id: Option<NodeId>,
    /// Owning user profile.
    pub user_profile_id: UserId,
    /// Budget-accounting group, when the execution belongs to one.
    #[serde(default)]
    pub epic_id: Option<EpicId>,
    /// Current lifecycle status.
    pub status: ExecutionStatus,
    /// The inbound event that created this execution.
    #[serde(default)]
    pub trigger_payload: Value,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the scheduler transitioned it to running.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal status was reached.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Why the execution failed.
    #[serde(default)]
    pub error_message: Option<String>,
    /// The extracted final output.
    #[serde(default)]
    pub final_output: Option<Value>,
    /// Accumulated cost totals.
    #[serde(default)]
    pub usage: TokenUsage,
}

impl ExecutionRecord {
    /// Create a pending execution for a workflow.
    #[must_use]
    pub fn new(
        workflow_id: WorkflowId,
        user_profile_id: UserId,
        trigger_payload: Value,
    ) -> Self {
        Self {
            execution_id: ExecutionId::new(),
            workflow_id,
            trigger_node_id: None,
            parent_execution_id: None,
            parent_node_id: None,
            user_profile_id,
            epic_id: None,
            status: ExecutionStatus::Pending,
            trigger_payload,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            final_output: None,
            usage: TokenUsage::default(),
        }
    }

    /// Scope the execution to a trigger node.
    #[must_use]
    pub fn with_trigger_node(mut self, node_id: NodeId) -> Self {
        self.trigger_node_id = Some(node_id);
        self
    }

    /// Mark this execution as the child of a sub-workflow node.
    #[must_use]
    pub fn with_parent(mut self, parent: ExecutionId, parent_node: NodeId) -> Self {
        self.parent_execution_id = Some(parent);
        self.parent_node_id = Some(parent_node);
        self
    }

    /// Attach an epic for budget aggregation.
    #[must_use]
    pub fn with_epic(mut self, epic_id: EpicId) -> Self {
        self.epic_id = Some(epic_id);
        self
    }

    /// Transition to a new status, validating the state machine and
    /// stamping `started_at` / `completed_at`.
    pub fn transition(&mut self, status: ExecutionStatus) -> Result<(), StoreError> {
        validate_transition(self.status, status)?;
        self.status = status;
        if status == ExecutionStatus::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if status.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Record a failure reason, truncated for persistence.
    pub fn set_error(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        let truncated: String = message.chars().take(ERROR_MESSAGE_MAX_LEN).collect();
        self.error_message = Some(truncated);
    }
}

/// One row per node attempt, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// Owning execution.
    pub execution_id: ExecutionId,
    /// The node that ran.
    pub node_id: NodeId,
    /// Outcome of this attempt.
    pub status: NodeRunStatus,
    /// Wall-clock duration of the attempt in milliseconds.
    pub duration_ms: u64,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// Truncated output preview.
    #[serde(default)]
    pub output: Option<Value>,
    /// Truncated error preview.
    #[serde(default)]
    pub error: Option<String>,
    /// Stable error classification code.
    #[serde(default)]
    pub error_code: Option<String>,
}

/// Marker for an execution interrupted for human confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTask {
    /// Short id shown to the user.
    pub task_id: TaskId,
    /// The interrupted execution.
    pub execution_id: ExecutionId,
    /// The node awaiting confirmation.
    pub node_id: NodeId,
    /// Prompt shown to the user.
    pub prompt: String,
    /// Delivery channel handle, when known.
    #[serde(default)]
    pub chat_id: Option<i64>,
    /// When the confirmation lapses.
    pub expires_at: DateTime<Utc>,
}

impl PendingTask {
    /// Returns `true` if the confirmation window has lapsed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

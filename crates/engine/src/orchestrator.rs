//! The orchestrator: shared wiring and the failure path.

use std::sync::Arc;
use std::time::Duration;

use conflux_component::ComponentRegistry;
use conflux_coordinator::{ExecutionCoordinator, ExecutionEvent};
use conflux_core::constants::{CONFIRMATION_TIMEOUT, ERROR_HANDLER_NODE, ZOMBIE_THRESHOLD};
use conflux_core::{ExecutionId, ExecutionStatus};
use conflux_store::{ExecutionRecord, ExecutionRepo, Job, JobQueue, KvStore};
use serde_json::json;

use crate::collaborators::{EpisodeSink, OutputDelivery};
use crate::error::EngineError;
use crate::retry::RetryPolicy;

/// The per-node orchestrator.
///
/// All public operations are queue entry points or control calls and
/// are idempotent with respect to duplicate delivery: each checks the
/// execution's status before mutating anything.
pub struct Orchestrator {
    pub(crate) repo: Arc<dyn ExecutionRepo>,
    pub(crate) kv: Arc<dyn KvStore>,
    pub(crate) queue: Arc<dyn JobQueue>,
    pub(crate) registry: Arc<ComponentRegistry>,
    pub(crate) retry: RetryPolicy,
    pub(crate) episodes: Option<Arc<dyn EpisodeSink>>,
    pub(crate) delivery: Option<Arc<dyn OutputDelivery>>,
    pub(crate) confirmation_timeout: Duration,
    pub(crate) zombie_threshold: Duration,
}

impl Orchestrator {
    /// Create an orchestrator over the given storage seams.
    #[must_use]
    pub fn new(
        repo: Arc<dyn ExecutionRepo>,
        kv: Arc<dyn KvStore>,
        queue: Arc<dyn JobQueue>,
        registry: Arc<ComponentRegistry>,
    ) -> Self {
        Self {
            repo,
            kv,
            queue,
            registry,
            retry: RetryPolicy::default(),
            episodes: None,
            delivery: None,
            confirmation_timeout: CONFIRMATION_TIMEOUT,
            zombie_threshold: ZOMBIE_THRESHOLD,
        }
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Attach a conversational-memory collaborator.
    #[must_use]
    pub fn with_episodes(mut self, episodes: Arc<dyn EpisodeSink>) -> Self {
        self.episodes = Some(episodes);
        self
    }

    /// Attach an output-delivery collaborator.
    #[must_use]
    pub fn with_delivery(mut self, delivery: Arc<dyn OutputDelivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Override how long confirmations stay valid.
    #[must_use]
    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    /// Override the zombie detection threshold.
    #[must_use]
    pub fn with_zombie_threshold(mut self, threshold: Duration) -> Self {
        self.zombie_threshold = threshold;
        self
    }

    /// Dispatch one queue job to its handler.
    pub async fn handle(&self, job: &Job) -> Result<(), EngineError> {
        match job {
            Job::StartExecution { execution_id } => self.start_execution(execution_id).await,
            Job::ExecuteNode {
                execution_id,
                node_id,
                retry_count,
            } => {
                self.execute_node_job(execution_id, node_id, *retry_count)
                    .await
            }
        }
    }

    /// Coordination facade for one execution.
    pub(crate) fn coordinator(&self, record: &ExecutionRecord) -> ExecutionCoordinator {
        ExecutionCoordinator::new(
            self.kv.clone(),
            record.execution_id,
            record.workflow_id.clone(),
        )
    }

    /// Move an execution to `failed`, publish, clean coordination keys,
    /// cascade to running children, and fire the error-handler workflow.
    ///
    /// Safe to call on any status: terminal executions are left alone.
    pub async fn fail_execution(
        &self,
        execution_id: &ExecutionId,
        error: &str,
    ) -> Result<(), EngineError> {
        let Some(mut record) = self.repo.execution(execution_id).await? else {
            return Ok(());
        };
        if record.status.is_terminal() {
            return Ok(());
        }

        record.transition(ExecutionStatus::Failed)?;
        record.set_error(error);
        self.repo.update_execution(&record).await?;
        tracing::error!(execution_id = %execution_id, error, "execution failed");

        let coord = self.coordinator(&record);
        coord
            .publish(&ExecutionEvent::ExecutionFailed {
                execution_id: execution_id.to_string(),
                error: record.error_message.clone().unwrap_or_default(),
            })
            .await;
        if let Err(cleanup_error) = coord.cleanup().await {
            tracing::warn!(%cleanup_error, "cleanup failed during execution failure");
        }

        // A child never outlives its parent's failure.
        for child in self.repo.running_children(execution_id).await? {
            Box::pin(self.fail_execution(&child.execution_id, "parent execution failed"))
                .await?;
        }

        self.spawn_error_handler(&record, error).await;
        Ok(())
    }

    /// Enqueue the workflow's error-handler child, when one is
    /// configured. Best-effort: never blocks the failure path.
    async fn spawn_error_handler(&self, failed: &ExecutionRecord, error: &str) {
        // an error handler failing must not spawn another handler
        if failed.parent_node_id.as_ref().map(conflux_core::NodeId::as_str)
            == Some(ERROR_HANDLER_NODE)
        {
            return;
        }

        let handler_id = match self.repo.workflow(&failed.workflow_id).await {
            Ok(Some(workflow)) => workflow.error_handler,
            Ok(None) => None,
            Err(lookup_error) => {
                tracing::warn!(%lookup_error, "error-handler lookup failed");
                return;
            }
        };
        let Some(handler_id) = handler_id else { return };

        let handler = match self.repo.workflow(&handler_id).await {
            Ok(Some(handler)) if handler.is_active => handler,
            Ok(_) => return,
            Err(lookup_error) => {
                tracing::warn!(%lookup_error, "error-handler lookup failed");
                return;
            }
        };

        let truncated: String = error.chars().take(1000).collect();
        let child = ExecutionRecord::new(
            handler.id.clone(),
            failed.user_profile_id.clone(),
            json!({
                "error": truncated,
                "source_workflow": failed.workflow_id.as_str(),
                "source_execution_id": failed.execution_id.to_string(),
            }),
        )
        .with_parent(failed.execution_id, ERROR_HANDLER_NODE.into());
        let child_id = child.execution_id;

        let enqueue = async {
            self.repo.create_execution(child).await?;
            self.queue
                .enqueue(Job::StartExecution {
                    execution_id: child_id,
                })
                .await
        };
        if let Err(spawn_error) = enqueue.await {
            tracing::warn!(%spawn_error, "error-handler enqueue failed");
        }
    }
}

//! Crash recovery: the zombie sweep and the queue failure callback.

use chrono::Utc;
use conflux_core::ExecutionStatus;
use conflux_store::Job;

use crate::error::EngineError;
use crate::orchestrator::Orchestrator;

impl Orchestrator {
    /// Periodic sweep: fail executions that have been `running` longer
    /// than the zombie threshold. Their workers are gone; nothing will
    /// ever drain their inflight counters. Returns how many were
    /// recovered. Retry counters are untouched; a recovered zombie is
    /// not a retryable condition.
    pub async fn recover_zombies(&self) -> Result<usize, EngineError> {
        let threshold = chrono::Duration::from_std(self.zombie_threshold)
            .unwrap_or_else(|_| chrono::Duration::minutes(15));
        let cutoff = Utc::now() - threshold;

        let zombies = self.repo.running_started_before(cutoff).await?;
        let count = zombies.len();
        for zombie in zombies {
            tracing::warn!(
                execution_id = %zombie.execution_id,
                started_at = ?zombie.started_at,
                "zombie execution recovered"
            );
            self.fail_execution(&zombie.execution_id, "zombie execution recovered")
                .await?;
        }
        Ok(count)
    }

    /// Queue failure callback: a job died outside the worker body (OOM,
    /// killed worker, panic). Marks the owning execution failed and
    /// cleans up. Swallows every internal error: a failing callback
    /// must never crash the queue worker.
    pub async fn on_job_failure(&self, job: &Job, error: &str) {
        let execution_id = *job.execution_id();
        let outcome = async {
            let Some(record) = self.repo.execution(&execution_id).await? else {
                return Ok::<(), EngineError>(());
            };
            if record.status != ExecutionStatus::Running {
                return Ok(());
            }
            self.fail_execution(&execution_id, &format!("job failed: {error}"))
                .await
        }
        .await;

        if let Err(callback_error) = outcome {
            tracing::error!(
                %execution_id,
                %callback_error,
                "failure callback could not mark execution failed"
            );
        }
    }

    /// Outer exception handler for a job whose handler returned an
    /// error: release the job's token, then fail the execution (which
    /// also cleans the coordination keys).
    pub(crate) async fn handle_job_error(&self, job: &Job, error: &str) {
        let execution_id = *job.execution_id();
        if let Job::ExecuteNode { .. } = job {
            if let Ok(Some(record)) = self.repo.execution(&execution_id).await {
                if !record.status.is_terminal() {
                    let coord = self.coordinator(&record);
                    if let Err(decr_error) = coord.decrement_inflight().await {
                        tracing::warn!(%decr_error, "inflight release failed");
                    }
                }
            }
        }
        if let Err(fail_error) = self.fail_execution(&execution_id, error).await {
            tracing::error!(
                %execution_id,
                %fail_error,
                "could not mark execution failed after job error"
            );
        }
    }
}

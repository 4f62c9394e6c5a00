//! The worker pool: drains the job queue and isolates job panics.

use std::sync::Arc;

use conflux_store::{Job, JobQueue};

use crate::orchestrator::Orchestrator;

/// Drains jobs from the queue into the orchestrator.
///
/// Each job runs in its own task so a panic surfaces as a join error
/// and routes to the failure callback instead of killing the worker,
/// the same contract a durable queue gives its failure hooks. Multiple
/// processes each run their own pool against the shared queue; within
/// one pool jobs are processed in order.
#[derive(Clone)]
pub struct WorkerPool {
    orchestrator: Arc<Orchestrator>,
    queue: Arc<dyn JobQueue>,
}

impl WorkerPool {
    /// Create a pool over the orchestrator and its queue.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            orchestrator,
            queue,
        }
    }

    /// Process jobs until the queue reports idle (no ready or delayed
    /// work). Delayed jobs are waited for, so a retry scheduled for the
    /// future still runs before this returns.
    pub async fn run_until_idle(&self) {
        while let Some(job) = self.queue.next_job().await {
            self.dispatch(job).await;
        }
    }

    /// Run one job with panic isolation.
    async fn dispatch(&self, job: Job) {
        let orchestrator = self.orchestrator.clone();
        let task_job = job.clone();
        let handle = tokio::spawn(async move { orchestrator.handle(&task_job).await });

        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(job_error)) => {
                tracing::error!(%job_error, ?job, "job handler failed");
                self.orchestrator
                    .handle_job_error(&job, &job_error.to_string())
                    .await;
            }
            Err(join_error) => {
                tracing::error!(%join_error, ?job, "job task aborted");
                self.orchestrator
                    .on_job_failure(&job, &join_error.to_string())
                    .await;
            }
        }
    }
}

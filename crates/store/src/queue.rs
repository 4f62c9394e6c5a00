//! The durable job queue.

use async_trait::async_trait;
use conflux_core::{ExecutionId, NodeId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::StoreError;

/// A unit of orchestrator work, dispatched through the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    /// Begin an execution: build topology, seed state, enqueue entries.
    StartExecution {
        /// The execution to start.
        execution_id: ExecutionId,
    },
    /// Run one node attempt.
    ExecuteNode {
        /// The owning execution.
        execution_id: ExecutionId,
        /// The node to run.
        node_id: NodeId,
        /// How many attempts preceded this one.
        #[serde(default)]
        retry_count: u32,
    },
}

impl Job {
    /// The execution this job belongs to. Job arguments always lead
    /// with it so failure callbacks can recover the owner.
    #[must_use]
    pub fn execution_id(&self) -> &ExecutionId {
        match self {
            Self::StartExecution { execution_id }
            | Self::ExecuteNode { execution_id, .. } => execution_id,
        }
    }
}

/// Durable job dispatch with delayed enqueue.
///
/// Delivery is at-least-once: consumers must tolerate duplicates, which
/// the orchestrator does through status checks and the completed-node
/// set.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job for immediate delivery.
    async fn enqueue(&self, job: Job) -> Result<(), StoreError>;

    /// Enqueue a job for delivery after `delay`.
    async fn enqueue_in(&self, delay: Duration, job: Job) -> Result<(), StoreError>;

    /// Take the next job. Waits for the earliest delayed job when only
    /// delayed work remains; returns `None` when the queue is idle.
    async fn next_job(&self) -> Option<Job>;

    /// Number of jobs waiting (ready + delayed).
    fn pending(&self) -> usize;
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Job>,
    delayed: Vec<(Instant, Job)>,
}

/// In-memory [`JobQueue`] driven by the tokio clock.
///
/// Delayed jobs are promoted when their deadline passes; under a paused
/// test clock `next_job` auto-advances to the earliest deadline.
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl MemoryQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Promote all due delayed jobs; returns the earliest remaining
    /// deadline, if any.
    fn promote_due(&self) -> Option<Instant> {
        let mut state = self.state.lock();
        let now = Instant::now();
        let mut remaining = Vec::with_capacity(state.delayed.len());
        let mut due: Vec<(Instant, Job)> = Vec::new();
        for (at, job) in state.delayed.drain(..) {
            if at <= now {
                due.push((at, job));
            } else {
                remaining.push((at, job));
            }
        }
        due.sort_by_key(|(at, _)| *at);
        for (_, job) in due {
            state.ready.push_back(job);
        }
        state.delayed = remaining;
        state.delayed.iter().map(|(at, _)| *at).min()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: Job) -> Result<(), StoreError> {
        self.state.lock().ready.push_back(job);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn enqueue_in(&self, delay: Duration, job: Job) -> Result<(), StoreError> {
        self.state
            .lock()
            .delayed
            .push((Instant::now() + delay, job));
        self.notify.notify_waiters();
        Ok(())
    }

    async fn next_job(&self) -> Option<Job> {
        loop {
            let next_deadline = self.promote_due();
            if let Some(job) = self.state.lock().ready.pop_front() {
                return Some(job);
            }
            match next_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => return None,
            }
        }
    }

    fn pending(&self) -> usize {
        let state = self.state.lock();
        state.ready.len() + state.delayed.len()
    }
}

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Conflux Engine
//!
//! The per-node orchestrator: given a compiled workflow topology and a
//! trigger event, it schedules individual node executions as jobs on
//! the shared queue, coordinates fan-out / fan-in through the KV store,
//! merges per-node state, drives loop iteration and conditional
//! branching, handles retries and human-in-the-loop interrupts, bridges
//! sub-workflows, enforces budgets, and finalizes or fails executions.
//!
//! The [`Orchestrator`] exposes the queue entry points
//! (`start_execution`, `execute_node_job`) and the control operations
//! (`resume_node`, `resume_from_child`, `recover_zombies`,
//! `on_job_failure`); the [`WorkerPool`] drains the queue and routes
//! job panics into the failure callback.

pub mod budget;
pub mod collaborators;
pub mod error;
pub mod loops;
pub mod orchestrator;
pub mod recovery;
pub mod retry;
pub mod runtime;
pub mod scheduler;
pub mod subworkflow;
pub mod worker;

pub use collaborators::{EpisodeSink, OutputDelivery};
pub use error::EngineError;
pub use orchestrator::Orchestrator;
pub use retry::RetryPolicy;
pub use runtime::WorkerPool;

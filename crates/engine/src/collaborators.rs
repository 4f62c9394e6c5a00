//! Optional external collaborators.
//!
//! Both seams are best-effort from the orchestrator's point of view: a
//! failing episode store or delivery channel is logged and never moves
//! an execution's status.

use async_trait::async_trait;
use conflux_core::{ExecutionId, UserId};
use conflux_store::ExecutionRecord;

use crate::error::EngineError;

/// Long-running conversational memory, opaque to the core.
#[async_trait]
pub trait EpisodeSink: Send + Sync {
    /// Open an episode for an execution, returning its handle.
    async fn start_episode(
        &self,
        execution_id: &ExecutionId,
        user_profile_id: &UserId,
    ) -> Result<String, EngineError>;

    /// Close an episode after finalization.
    async fn complete_episode(&self, episode_id: &str) -> Result<(), EngineError>;
}

/// Delivery of final output to external channels.
#[async_trait]
pub trait OutputDelivery: Send + Sync {
    /// Hand a completed execution to the delivery channel.
    async fn deliver(&self, execution: &ExecutionRecord) -> Result<(), EngineError>;
}

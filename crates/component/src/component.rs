//! The component invocation seam.

use async_trait::async_trait;
use conflux_state::{NodeResult, WorkflowState};

use crate::error::ComponentError;

/// One node's executable behavior.
///
/// The orchestrator guarantees the state view is fully populated
/// (`execution_id`, `node_outputs`, `trigger`, `user_context`) and that
/// `invoke` runs at most once per attempt; a retry loads a fresh state
/// reflecting any concurrent sibling writes. Components run
/// synchronously with respect to their worker; suspension happens only
/// through the signals in the returned [`NodeResult`].
#[async_trait]
pub trait Component: Send + Sync {
    /// Run the component against the current execution state.
    async fn invoke(&self, state: &WorkflowState) -> Result<NodeResult, ComponentError>;
}

#[async_trait]
impl<F> Component for F
where
    F: Fn(&WorkflowState) -> Result<NodeResult, ComponentError> + Send + Sync,
{
    async fn invoke(&self, state: &WorkflowState) -> Result<NodeResult, ComponentError> {
        self(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::UserId;
    use serde_json::json;

    #[tokio::test]
    async fn closures_are_components() {
        let component = |state: &WorkflowState| {
            Ok::<_, ComponentError>(NodeResult::output(json!(state.route.clone())))
        };
        let mut state =
            WorkflowState::from_trigger("e1", json!({}), &UserId::new("u1"));
        state.route = "r1".into();

        let result = component.invoke(&state).await.unwrap();
        assert_eq!(result.port_data["output"], json!("r1"));
    }
}

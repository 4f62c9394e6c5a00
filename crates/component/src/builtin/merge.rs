//! The `merge` component: fan-in junction.

use async_trait::async_trait;
use conflux_state::{NodeResult, WorkflowState};
use serde_json::Value;

use crate::component::Component;
use crate::error::ComponentError;

/// Collects the outputs of all parents into one port.
///
/// The scheduler's fan-in counter guarantees this runs exactly once,
/// after every parent has written its output slot; the component itself
/// just snapshots the merged view.
pub struct MergeComponent;

#[async_trait]
impl Component for MergeComponent {
    async fn invoke(&self, state: &WorkflowState) -> Result<NodeResult, ComponentError> {
        Ok(NodeResult::default()
            .with_port("merged", Value::Object(state.node_outputs.clone())))
    }
}

/// Factory registered under the `merge` component type.
pub fn factory(_config: &Value) -> Result<Box<dyn Component>, ComponentError> {
    Ok(Box::new(MergeComponent))
}

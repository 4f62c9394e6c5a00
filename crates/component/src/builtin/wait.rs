//! The `wait` component: delays successor scheduling.

use std::time::Duration;

use async_trait::async_trait;
use conflux_state::{NodeResult, WorkflowState};
use serde::Deserialize;
use serde_json::Value;

use crate::component::Component;
use crate::error::ComponentError;

#[derive(Debug, Deserialize)]
struct WaitConfig {
    #[serde(default)]
    seconds: f64,
}

/// Passes state through unchanged and asks the scheduler to delay its
/// successors by the configured number of seconds.
#[derive(Debug)]
pub struct WaitComponent {
    delay: Duration,
}

impl WaitComponent {
    /// Build from a stored config blob.
    pub fn from_config(config: &Value) -> Result<Self, ComponentError> {
        let config: WaitConfig = serde_json::from_value(config.clone())
            .map_err(|error| ComponentError::InvalidConfig(error.to_string()))?;
        if config.seconds < 0.0 {
            return Err(ComponentError::InvalidConfig(
                "wait seconds must be non-negative".into(),
            ));
        }
        Ok(Self {
            delay: Duration::from_secs_f64(config.seconds),
        })
    }
}

#[async_trait]
impl Component for WaitComponent {
    async fn invoke(&self, _state: &WorkflowState) -> Result<NodeResult, ComponentError> {
        Ok(NodeResult::empty().with_delay(self.delay))
    }
}

/// Factory registered under the `wait` component type.
pub fn factory(config: &Value) -> Result<Box<dyn Component>, ComponentError> {
    Ok(Box::new(WaitComponent::from_config(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::UserId;
    use serde_json::json;

    #[tokio::test]
    async fn returns_delay_hint() {
        let component = WaitComponent::from_config(&json!({"seconds": 2.5})).unwrap();
        let state =
            WorkflowState::from_trigger("e1", json!({}), &UserId::new("u1"));
        let result = component.invoke(&state).await.unwrap();
        assert_eq!(result.delay, Some(Duration::from_secs_f64(2.5)));
        assert!(result.port_data.is_empty());
    }

    #[tokio::test]
    async fn missing_seconds_defaults_to_zero() {
        let component = WaitComponent::from_config(&json!({})).unwrap();
        let state =
            WorkflowState::from_trigger("e1", json!({}), &UserId::new("u1"));
        let result = component.invoke(&state).await.unwrap();
        assert_eq!(result.delay, Some(Duration::ZERO));
    }

    #[test]
    fn negative_seconds_rejected() {
        let err = WaitComponent::from_config(&json!({"seconds": -1})).unwrap_err();
        assert!(matches!(err, ComponentError::InvalidConfig(_)));
    }
}

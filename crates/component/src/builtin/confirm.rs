//! The `human_confirmation` component: interrupt, then route on the
//! user's reply.

use async_trait::async_trait;
use conflux_state::{NodeResult, WorkflowState};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::component::Component;
use crate::error::ComponentError;

const AFFIRMATIVE: [&str; 8] = ["yes", "y", "confirm", "confirmed", "ok", "approve", "true", "1"];

#[derive(Debug, Deserialize)]
struct ConfirmConfig {
    #[serde(default = "ConfirmConfig::default_prompt")]
    prompt: String,
}

impl ConfirmConfig {
    fn default_prompt() -> String {
        "Confirmation required.".into()
    }
}

/// Two-phase confirmation gate.
///
/// Without resume input present the component signals an interrupt and
/// the worker parks the execution. Re-invoked after `resume_node`, it
/// consumes the user's reply and routes `confirmed` or `cancelled`.
pub struct ConfirmComponent {
    prompt: String,
}

impl ConfirmComponent {
    /// Build from a stored config blob.
    pub fn from_config(config: &Value) -> Result<Self, ComponentError> {
        let config: ConfirmConfig = serde_json::from_value(config.clone())
            .map_err(|error| ComponentError::InvalidConfig(error.to_string()))?;
        Ok(Self {
            prompt: config.prompt,
        })
    }
}

#[async_trait]
impl Component for ConfirmComponent {
    async fn invoke(&self, state: &WorkflowState) -> Result<NodeResult, ComponentError> {
        let Some(input) = &state.resume_input else {
            return Ok(NodeResult::interrupt(self.prompt.clone()));
        };

        let confirmed = AFFIRMATIVE.contains(&input.trim().to_ascii_lowercase().as_str());
        let route = if confirmed { "confirmed" } else { "cancelled" };
        Ok(NodeResult::default()
            .with_route(route)
            .with_port("confirmed", json!(confirmed))
            .with_port("user_input", json!(input)))
    }
}

/// Factory registered under the `human_confirmation` component type.
pub fn factory(config: &Value) -> Result<Box<dyn Component>, ComponentError> {
    Ok(Box::new(ConfirmComponent::from_config(config)?))
}

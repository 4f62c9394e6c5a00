//! The `switch` component: rule-based conditional routing.

use async_trait::async_trait;
use conflux_core::constants::FALLBACK_ROUTE;
use conflux_state::{NodeResult, WorkflowState};
use serde::Deserialize;
use serde_json::Value;

use crate::component::Component;
use crate::error::ComponentError;
use crate::rules::Rule;

#[derive(Debug, Deserialize)]
struct SwitchConfig {
    #[serde(default)]
    rules: Vec<Rule>,
    #[serde(default)]
    enable_fallback: bool,
    #[serde(default)]
    extra_config: ExtraConfig,
}

#[derive(Debug, Default, Deserialize)]
struct ExtraConfig {
    #[serde(default)]
    enable_fallback: bool,
}

/// Evaluates an ordered rule list against state and routes to the first
/// match's rule id.
///
/// With fallback enabled an unmatched state routes to `__other__`;
/// otherwise the route is empty and the switch acts as a sink unless an
/// edge matches the empty route.
#[derive(Debug)]
pub struct SwitchComponent {
    rules: Vec<Rule>,
    enable_fallback: bool,
}

impl SwitchComponent {
    /// Build from a stored config blob.
    pub fn from_config(config: &Value) -> Result<Self, ComponentError> {
        let config: SwitchConfig = serde_json::from_value(config.clone())
            .map_err(|error| ComponentError::InvalidConfig(error.to_string()))?;
        Ok(Self {
            enable_fallback: config.enable_fallback || config.extra_config.enable_fallback,
            rules: config.rules,
        })
    }
}

#[async_trait]
impl Component for SwitchComponent {
    async fn invoke(&self, state: &WorkflowState) -> Result<NodeResult, ComponentError> {
        let state_value = serde_json::to_value(state)
            .map_err(|error| ComponentError::Permanent(error.to_string()))?;

        let matched = self.rules.iter().find(|rule| rule.matches(&state_value));
        let route = match matched {
            Some(rule) => rule.id.clone(),
            None if self.enable_fallback => FALLBACK_ROUTE.to_string(),
            None => String::new(),
        };

        let mut result = NodeResult::default()
            .with_route(route.clone())
            .with_port("route", Value::String(route));
        if let Some(label) = matched.and_then(|rule| rule.label.clone()) {
            result = result.with_port("matched_label", Value::String(label));
        }
        Ok(result)
    }
}

/// Factory registered under the `switch` component type.
pub fn factory(config: &Value) -> Result<Box<dyn Component>, ComponentError> {
    Ok(Box::new(SwitchComponent::from_config(config)?))
}

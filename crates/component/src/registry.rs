//! Component factory resolution.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::builtin;
use crate::component::Component;
use crate::error::ComponentError;

/// Builds a [`Component`] from a node's stored configuration.
///
/// The factory runs once per worker call and may do expensive setup
/// (client construction, credential resolution). Credential lookup
/// failures must surface as [`ComponentError::CredentialNotFound`] so
/// the worker fails fast instead of retrying a permanent config error.
pub trait ComponentFactory: Send + Sync {
    /// Build a component instance for one invocation.
    fn create(&self, config: &Value) -> Result<Box<dyn Component>, ComponentError>;
}

impl<F> ComponentFactory for F
where
    F: Fn(&Value) -> Result<Box<dyn Component>, ComponentError> + Send + Sync,
{
    fn create(&self, config: &Value) -> Result<Box<dyn Component>, ComponentError> {
        self(config)
    }
}

/// Maps `component_type` strings to factories.
pub struct ComponentRegistry {
    factories: DashMap<String, Arc<dyn ComponentFactory>>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    /// Create a registry with the built-in control-flow components
    /// (`switch`, `wait`, `human_confirmation`, `merge`) registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("switch", Arc::new(builtin::switch::factory));
        registry.register("wait", Arc::new(builtin::wait::factory));
        registry.register(
            "human_confirmation",
            Arc::new(builtin::confirm::factory),
        );
        registry.register("merge", Arc::new(builtin::merge::factory));
        registry
    }

    /// Register a factory for a component type, replacing any previous
    /// registration.
    pub fn register(&self, component_type: impl Into<String>, factory: Arc<dyn ComponentFactory>) {
        self.factories.insert(component_type.into(), factory);
    }

    /// Resolve the factory for a component type.
    pub fn resolve(
        &self,
        component_type: &str,
    ) -> Result<Arc<dyn ComponentFactory>, ComponentError> {
        self.factories
            .get(component_type)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ComponentError::UnknownComponentType(component_type.to_string()))
    }

    /// Registered component types (test helper).
    #[must_use]
    pub fn component_types(&self) -> Vec<String> {
        self.factories
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_state::NodeResult;
    use serde_json::json;

    #[test]
    fn resolve_unknown_type() {
        let registry = ComponentRegistry::new();
        let err = match registry.resolve("quantum") {
            Ok(_) => panic!("expected resolve to fail for unknown component type"),
            Err(err) => err,
        };
        assert!(matches!(err, ComponentError::UnknownComponentType(_)));
    }

    #[test]
    fn register_and_resolve() {
        let registry = ComponentRegistry::new();
        registry.register(
            "echo",
            Arc::new(|_config: &Value| {
                Ok(Box::new(|state: &conflux_state::WorkflowState| {
                    Ok::<_, ComponentError>(NodeResult::output(json!(state.route.clone())))
                }) as Box<dyn Component>)
            }),
        );
        assert!(registry.resolve("echo").is_ok());
    }

    #[test]
    fn builtins_are_registered() {
        let registry = ComponentRegistry::with_builtins();
        let mut types = registry.component_types();
        types.sort();
        assert_eq!(types, vec!["human_confirmation", "merge", "switch", "wait"]);
    }

    #[test]
    fn registration_replaces() {
        let registry = ComponentRegistry::with_builtins();
        registry.register(
            "switch",
            Arc::new(|_config: &Value| {
                Err::<Box<dyn Component>, ComponentError>(ComponentError::Permanent(
                    "shadowed".into(),
                ))
            }),
        );
        let factory = registry.resolve("switch").unwrap();
        assert!(factory.create(&json!({})).is_err());
    }
}

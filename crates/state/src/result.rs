//! The component return contract.
//!
//! A component function produces a [`NodeResult`]. Rust components build
//! one directly through the fluent constructors; script-style components
//! that hand back raw JSON go through [`NodeResult::from_value`], which
//! implements the `_`-key extraction rules of the wire contract.

use std::time::Duration;

use conflux_core::ExecutionId;
use serde_json::{Map, Value};

use crate::error::StateError;
use crate::message::Message;
use crate::usage::TokenUsage;

/// Signal that the node suspended waiting for a child execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubworkflowWait {
    /// The child execution created by the component.
    pub child_execution_id: ExecutionId,
}

/// Signal that the node is a loop head with items to iterate.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSeed {
    /// Items to iterate over, one body pass each.
    pub items: Vec<Value>,
}

/// Signal that the node wants human confirmation before continuing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptSignal {
    /// Prompt shown to the user.
    pub prompt: String,
}

/// What a component function returns.
///
/// The worker applies this to [`WorkflowState`](crate::state::WorkflowState)
/// via [`WorkflowState::apply`](crate::state::WorkflowState::apply); control
/// signals (`delay`, `subworkflow`, `loop_seed`, `interrupt`) are consumed
/// by the worker itself and never stored in state.
#[derive(Debug, Clone, Default)]
pub struct NodeResult {
    /// Route assignment (`_route`), overwrites `state.route`.
    pub route: Option<String>,
    /// New messages (`_messages`), appended to `state.messages`.
    pub messages: Vec<Message>,
    /// Free-form state updates (`_state_patch`); protected keys are
    /// dropped at application time.
    pub state_patch: Map<String, Value>,
    /// Delay hint for successor scheduling (`_delay_seconds`).
    pub delay: Option<Duration>,
    /// Sub-workflow suspension (`_subworkflow`).
    pub subworkflow: Option<SubworkflowWait>,
    /// Loop seeding (`_loop`).
    pub loop_seed: Option<LoopSeed>,
    /// Component-signalled interrupt.
    pub interrupt: Option<InterruptSignal>,
    /// Usage contributed by this attempt (`_token_usage`), summed into
    /// the execution totals.
    pub usage: Option<TokenUsage>,
    /// Remaining non-underscore keys: this node's output port data,
    /// written to `state.node_outputs[node_id]`.
    pub port_data: Map<String, Value>,
    /// Legacy full-control format: the entire returned map, merged into
    /// state with typed merge semantics instead of the fields above.
    pub legacy_merge: Option<Map<String, Value>>,
}

impl NodeResult {
    /// A result with no effect on state (triggers, interrupts).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A result whose port data is `{"output": value}`.
    #[must_use]
    pub fn output(value: Value) -> Self {
        Self::default().with_port("output", value)
    }

    /// Add a port data entry.
    #[must_use]
    pub fn with_port(mut self, key: impl Into<String>, value: Value) -> Self {
        self.port_data.insert(key.into(), value);
        self
    }

    /// Set the route.
    #[must_use]
    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    /// Append a message.
    #[must_use]
    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Add a state patch entry.
    #[must_use]
    pub fn with_patch(mut self, key: impl Into<String>, value: Value) -> Self {
        self.state_patch.insert(key.into(), value);
        self
    }

    /// Set the successor-scheduling delay.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Record usage for this attempt.
    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Suspend until the given child execution completes.
    #[must_use]
    pub fn wait_for(child_execution_id: ExecutionId) -> Self {
        Self {
            subworkflow: Some(SubworkflowWait {
                child_execution_id,
            }),
            ..Self::default()
        }
    }

    /// Seed a loop over the given items.
    #[must_use]
    pub fn loop_over(items: Vec<Value>) -> Self {
        Self {
            loop_seed: Some(LoopSeed { items }),
            ..Self::default()
        }
    }

    /// Request human confirmation.
    #[must_use]
    pub fn interrupt(prompt: impl Into<String>) -> Self {
        Self {
            interrupt: Some(InterruptSignal {
                prompt: prompt.into(),
            }),
            ..Self::default()
        }
    }

    /// Returns `true` if applying this result would not change state.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.route.is_none()
            && self.messages.is_empty()
            && self.state_patch.is_empty()
            && self.usage.is_none()
            && self.port_data.is_empty()
            && self.legacy_merge.is_none()
    }

    /// Interpret a raw JSON value as a component result.
    ///
    /// A map containing `node_outputs` is the legacy full-control format
    /// and is carried whole for typed merging. Otherwise keys beginning
    /// with `_` are extracted into their dedicated fields (unknown `_`
    /// keys are dropped), and the remainder becomes port data.
    pub fn from_value(value: Value) -> Result<Self, StateError> {
        let map = match value {
            Value::Null => return Ok(Self::empty()),
            Value::Object(map) if map.is_empty() => return Ok(Self::empty()),
            Value::Object(map) => map,
            other => {
                return Err(StateError::MalformedResult(format!(
                    "expected an object, got {other}"
                )));
            }
        };

        if map.contains_key("node_outputs") {
            return Ok(Self {
                legacy_merge: Some(map),
                ..Self::default()
            });
        }

        let mut result = Self::default();
        for (key, value) in map {
            if !key.starts_with('_') {
                result.port_data.insert(key, value);
                continue;
            }
            match key.as_str() {
                "_route" => {
                    if let Value::String(route) = value {
                        result.route = Some(route);
                    }
                }
                "_messages" => {
                    let messages: Vec<Message> = serde_json::from_value(value)?;
                    result.messages.extend(messages);
                }
                "_state_patch" => {
                    if let Value::Object(patch) = value {
                        result.state_patch.extend(patch);
                    }
                }
                "_delay_seconds" => {
                    let seconds = value.as_f64().ok_or_else(|| {
                        StateError::MalformedResult("_delay_seconds is not a number".into())
                    })?;
                    result.delay = Some(Duration::from_secs_f64(seconds.max(0.0)));
                }
                "_subworkflow" => {
                    let child = value.get("child_execution_id").ok_or_else(|| {
                        StateError::MalformedResult(
                            "_subworkflow missing child_execution_id".into(),
                        )
                    })?;
                    let child_execution_id: ExecutionId =
                        serde_json::from_value(child.clone())?;
                    result.subworkflow = Some(SubworkflowWait {
                        child_execution_id,
                    });
                }
                "_loop" => {
                    let items = value
                        .get("items")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    result.loop_seed = Some(LoopSeed { items });
                }
                "_interrupt" => {
                    let prompt = value
                        .get("prompt")
                        .and_then(Value::as_str)
                        .unwrap_or("Confirmation required.")
                        .to_string();
                    result.interrupt = Some(InterruptSignal { prompt });
                }
                "_token_usage" => {
                    result.usage = Some(serde_json::from_value(value)?);
                }
                // Unknown transient keys are dropped, not forwarded.
                _ => {}
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_result_is_empty() {
        assert!(NodeResult::empty().is_empty());
        assert!(!NodeResult::output(json!(1)).is_empty());
    }

    #[test]
    fn builder_chain() {
        let result = NodeResult::output(json!({"answer": 42}))
            .with_route("done")
            .with_message(Message::ai("42"))
            .with_patch("notes", json!("checked"))
            .with_delay(Duration::from_secs(3));

        assert_eq!(result.route.as_deref(), Some("done"));
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.state_patch["notes"], json!("checked"));
        assert_eq!(result.delay, Some(Duration::from_secs(3)));
        assert_eq!(result.port_data["output"], json!({"answer": 42}));
    }

    #[test]
    fn from_value_null_and_empty() {
        assert!(NodeResult::from_value(Value::Null).unwrap().is_empty());
        assert!(NodeResult::from_value(json!({})).unwrap().is_empty());
    }

    #[test]
    fn from_value_rejects_non_object() {
        let err = NodeResult::from_value(json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("expected an object"));
    }

    #[test]
    fn from_value_typed_extraction() {
        let result = NodeResult::from_value(json!({
            "_route": "confirmed",
            "_messages": [{"type": "ai", "content": "done"}],
            "_state_patch": {"notes": "x", "messages": "evil"},
            "_delay_seconds": 2.5,
            "summary": "ok",
        }))
        .unwrap();

        assert_eq!(result.route.as_deref(), Some("confirmed"));
        assert_eq!(result.messages[0].content, "done");
        // the patch is carried verbatim; protection happens at apply time
        assert_eq!(result.state_patch.len(), 2);
        assert_eq!(result.delay, Some(Duration::from_secs_f64(2.5)));
        assert_eq!(result.port_data["summary"], json!("ok"));
        assert!(result.legacy_merge.is_none());
    }

    #[test]
    fn from_value_legacy_format() {
        let result = NodeResult::from_value(json!({
            "node_outputs": {"a": {"output": 1}},
            "route": "r1",
        }))
        .unwrap();

        let legacy = result.legacy_merge.expect("legacy merge");
        assert!(legacy.contains_key("node_outputs"));
        assert!(legacy.contains_key("route"));
        assert!(result.port_data.is_empty());
    }

    #[test]
    fn from_value_subworkflow() {
        let child = ExecutionId::new();
        let result = NodeResult::from_value(json!({
            "_subworkflow": {"child_execution_id": child},
        }))
        .unwrap();
        assert_eq!(
            result.subworkflow.unwrap().child_execution_id,
            child
        );
    }

    #[test]
    fn from_value_loop_seed() {
        let result = NodeResult::from_value(json!({"_loop": {"items": [1, 2, 3]}})).unwrap();
        assert_eq!(result.loop_seed.unwrap().items, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn from_value_interrupt_default_prompt() {
        let result = NodeResult::from_value(json!({"_interrupt": {}})).unwrap();
        assert_eq!(result.interrupt.unwrap().prompt, "Confirmation required.");
    }

    #[test]
    fn from_value_drops_unknown_transient_keys() {
        let result = NodeResult::from_value(json!({"_totally_unknown": 1, "x": 2})).unwrap();
        assert_eq!(result.port_data.len(), 1);
        assert_eq!(result.port_data["x"], json!(2));
    }

    #[test]
    fn from_value_malformed_delay() {
        let err = NodeResult::from_value(json!({"_delay_seconds": "soon"})).unwrap_err();
        assert!(err.to_string().contains("_delay_seconds"));
    }
}

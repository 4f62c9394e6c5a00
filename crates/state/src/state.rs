//! The mutable per-execution state blob.

use conflux_core::{NodeId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::Message;
use crate::result::NodeResult;
use crate::usage::TokenUsage;

/// Patch keys that a `_state_patch` may never touch.
///
/// `messages` and `node_outputs` have dedicated merge semantics;
/// `node_results` is the historical alias some components still emit.
pub const PROTECTED_PATCH_KEYS: [&str; 3] = ["messages", "node_outputs", "node_results"];

/// Loop scope visible to body nodes while an iteration runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopScope {
    /// Zero-based iteration index.
    pub index: usize,
    /// The item for the current iteration.
    pub item: Value,
    /// The full item list.
    pub items: Vec<Value>,
}

/// Shared state for one execution.
///
/// The blob is read-modify-write through the KV store: workers load it,
/// apply one node's result, and write it back. Transient keys of the
/// wire format (`_`-prefixed) are dedicated fields here, so the
/// protected-key rule is structural rather than a runtime check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Owning execution id. Immutable after init.
    pub execution_id: String,
    /// Conversation history. Append-only.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Per-node output port data; one slot per node, latest attempt wins.
    #[serde(default)]
    pub node_outputs: Map<String, Value>,
    /// The inbound trigger payload.
    #[serde(default)]
    pub trigger: Value,
    /// Route selected by the most recent routing node.
    #[serde(default)]
    pub route: String,
    /// Requester context (profile id, delivery channel handle).
    #[serde(default)]
    pub user_context: Map<String, Value>,
    /// Explicit final output, when a node sets one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Loop scope, present only while a loop iteration is running.
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_scope: Option<LoopScope>,
    /// Child outputs delivered to waiting sub-workflow nodes.
    #[serde(
        default,
        rename = "_subworkflow_results",
        skip_serializing_if = "Map::is_empty"
    )]
    pub subworkflow_results: Map<String, Value>,
    /// Per-loop body errors for the current iteration.
    #[serde(default, rename = "_loop_errors", skip_serializing_if = "Map::is_empty")]
    pub loop_errors: Map<String, Value>,
    /// Accumulated usage totals for the whole execution.
    #[serde(
        default,
        rename = "_execution_token_usage",
        skip_serializing_if = "TokenUsage::is_empty"
    )]
    pub token_usage: TokenUsage,
    /// Human input delivered by resume; consumed by the next attempt.
    #[serde(default, rename = "_resume_input", skip_serializing_if = "Option::is_none")]
    pub resume_input: Option<String>,
    /// Opaque keys set by component state patches.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowState {
    /// Build the initial state for an execution from its trigger payload.
    ///
    /// `messages` starts with the payload's `text` as a human message
    /// when present; `user_context` carries the owner profile and, when
    /// the payload names one, the delivery chat handle.
    #[must_use]
    pub fn from_trigger(
        execution_id: impl Into<String>,
        payload: Value,
        user_profile_id: &UserId,
    ) -> Self {
        let mut messages = Vec::new();
        if let Some(text) = payload.get("text").and_then(Value::as_str) {
            if !text.is_empty() {
                messages.push(Message::human(text));
            }
        }

        let mut user_context = Map::new();
        user_context.insert(
            "user_profile_id".into(),
            Value::String(user_profile_id.as_str().to_string()),
        );
        if let Some(chat_id) = payload.get("chat_id") {
            user_context.insert("chat_id".into(), chat_id.clone());
        }

        Self {
            execution_id: execution_id.into(),
            messages,
            node_outputs: Map::new(),
            trigger: payload,
            route: String::new(),
            user_context,
            output: None,
            loop_scope: None,
            subworkflow_results: Map::new(),
            loop_errors: Map::new(),
            token_usage: TokenUsage::default(),
            resume_input: None,
            extra: Map::new(),
        }
    }

    /// Apply a component result for `node_id`.
    ///
    /// Control signals (`delay`, `subworkflow`, `loop_seed`, `interrupt`)
    /// are not state and are left for the worker to consume.
    pub fn apply(&mut self, node_id: &NodeId, result: &NodeResult) {
        if let Some(legacy) = &result.legacy_merge {
            self.merge_legacy(legacy);
            return;
        }

        if let Some(route) = &result.route {
            self.route = route.clone();
        }
        self.messages.extend(result.messages.iter().cloned());
        if let Some(usage) = &result.usage {
            self.token_usage.merge(usage);
        }
        self.apply_patch(&result.state_patch);
        if !result.port_data.is_empty() {
            self.node_outputs.insert(
                node_id.as_str().to_string(),
                Value::Object(result.port_data.clone()),
            );
        }
    }

    /// Apply a `_state_patch` map, dropping protected and transient keys.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            if PROTECTED_PATCH_KEYS.contains(&key.as_str()) || key.starts_with('_') {
                continue;
            }
            match key.as_str() {
                "execution_id" | "loop" => {} // engine-managed
                "route" => {
                    if let Value::String(route) = value {
                        self.route = route.clone();
                    }
                }
                "trigger" => self.trigger = value.clone(),
                "output" => self.output = Some(value.clone()),
                "user_context" => {
                    if let Value::Object(ctx) = value {
                        self.user_context = ctx.clone();
                    }
                }
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Merge a legacy full-control result with typed per-key semantics:
    /// append for messages, union for maps, numeric sum for usage,
    /// overwrite for scalars.
    fn merge_legacy(&mut self, map: &Map<String, Value>) {
        for (key, value) in map {
            match key.as_str() {
                "messages" => {
                    if let Ok(messages) =
                        serde_json::from_value::<Vec<Message>>(value.clone())
                    {
                        self.messages.extend(messages);
                    }
                }
                "node_outputs" => {
                    if let Value::Object(outputs) = value {
                        for (node, output) in outputs {
                            self.node_outputs.insert(node.clone(), output.clone());
                        }
                    }
                }
                "node_results" | "execution_id" => {}
                "route" => {
                    if let Value::String(route) = value {
                        self.route = route.clone();
                    }
                }
                "trigger" => self.trigger = value.clone(),
                "output" => self.output = Some(value.clone()),
                "user_context" => {
                    if let Value::Object(ctx) = value {
                        self.user_context = ctx.clone();
                    }
                }
                "loop" => {
                    if let Ok(scope) = serde_json::from_value::<LoopScope>(value.clone()) {
                        self.loop_scope = Some(scope);
                    }
                }
                "_subworkflow_results" => {
                    if let Value::Object(results) = value {
                        for (node, output) in results {
                            self.subworkflow_results
                                .insert(node.clone(), output.clone());
                        }
                    }
                }
                "_loop_errors" => {
                    if let Value::Object(errors) = value {
                        for (loop_id, entry) in errors {
                            self.loop_errors.insert(loop_id.clone(), entry.clone());
                        }
                    }
                }
                "_execution_token_usage" => {
                    if let Ok(usage) = serde_json::from_value::<TokenUsage>(value.clone()) {
                        self.token_usage.merge(&usage);
                    }
                }
                "_resume_input" => {
                    if let Value::String(input) = value {
                        self.resume_input = Some(input.clone());
                    }
                }
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Take and clear the resume input.
    pub fn take_resume_input(&mut self) -> Option<String> {
        self.resume_input.take()
    }

    /// Extract the final output of a completed execution.
    ///
    /// Priority: explicit `output`, else the last AI message, else the
    /// node outputs map, else the last message of any kind.
    #[must_use]
    pub fn final_output(&self) -> Option<Value> {
        if let Some(output) = &self.output {
            return Some(serde_json::json!({ "output": output }));
        }
        if let Some(message) = self.messages.iter().rev().find(|m| m.is_ai_content()) {
            return Some(serde_json::json!({ "message": message.content }));
        }
        if !self.node_outputs.is_empty() {
            return Some(serde_json::json!({ "node_outputs": self.node_outputs }));
        }
        self.messages
            .last()
            .map(|message| serde_json::json!({ "message": message.content }))
    }
}

//! Conversation messages carried in execution state.

use serde::{Deserialize, Serialize};

/// The role a message was produced by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// User input (trigger text, confirmation replies).
    Human,
    /// Model output.
    Ai,
    /// System prompt material.
    System,
    /// Tool invocation result.
    Tool,
}

/// A single message in the execution's conversation history.
///
/// `messages` is append-only within an execution: nodes return new
/// messages and the worker appends them; nothing ever rewrites history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced the message.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Message text.
    pub content: String,
    /// Provider-specific extras (tool call ids, model names, …).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub additional_kwargs: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    /// Create a human message.
    pub fn human(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Human, content)
    }

    /// Create an AI message.
    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Ai, content)
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageKind::System, content)
    }

    /// Create a tool message.
    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Tool, content)
    }

    fn new(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            additional_kwargs: serde_json::Map::new(),
        }
    }

    /// Attach a provider-specific extra.
    #[must_use]
    pub fn with_kwarg(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.additional_kwargs.insert(key.into(), value);
        self
    }

    /// Returns `true` if this is an AI message with non-empty content.
    #[must_use]
    pub fn is_ai_content(&self) -> bool {
        self.kind == MessageKind::Ai && !self.content.is_empty()
    }
}

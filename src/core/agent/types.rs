//! Core agent types.

use serde::{Deserialize, Serialize};

use super::mode::Mode;

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced the message.
    pub role: Role,

    /// Text content, absent for assistant turns that only carry tool calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Tool calls requested by an assistant turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Id of the call a `tool` message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Create a system message.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    /// Create a user message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    /// Create a plain assistant message.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    /// Create an assistant message carrying tool calls.
    ///
    /// Empty text is stored as no content.
    #[must_use]
    pub fn assistant_with_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let text = text.into();
        Self {
            role: Role::Assistant,
            content: (!text.is_empty()).then_some(text),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Create a tool result message answering `tool_call_id`.
    #[must_use]
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Text content, or an empty string.
    #[must_use]
    pub fn text_content(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlates the call with its tool result message.
    pub id: String,

    /// Registry name of the tool.
    pub name: String,

    /// Arguments as a JSON-encoded object.
    pub arguments_json: String,
}

impl ToolCall {
    /// Create a call with a freshly generated id.
    #[must_use]
    pub fn generated(name: impl Into<String>, arguments_json: impl Into<String>) -> Self {
        Self {
            id: generate_call_id(),
            name: name.into(),
            arguments_json: arguments_json.into(),
        }
    }
}

/// Generate a tool call id for calls the model did not label.
#[must_use]
pub fn generate_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// A dispatched call paired with its result, kept for introspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallResult {
    pub call: ToolCall,
    pub result: serde_json::Value,
    pub is_error: bool,
}

/// Tool definition sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,

    /// Tool description.
    pub description: String,

    /// JSON schema for input parameters.
    pub input_schema: serde_json::Value,
}

/// How tool calls travel between the model and the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallFormat {
    /// Structured `tool_calls` fields supported by the transport.
    #[default]
    Native,
    /// `<@TOOL_CALL>` blocks embedded in the assistant text.
    Inline,
}

/// Why the response stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

/// Token usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Events emitted during chat for rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Visible text chunk from the assistant.
    Text(String),
    /// Tool invocation starting.
    ToolStart { id: String, name: String },
    /// Tool invocation finished.
    ToolCall {
        id: String,
        name: String,
        output: String,
        is_error: bool,
    },
    /// The active mode changed.
    ModeChanged(Mode),
    /// Token usage for one model response.
    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },
    /// The turn stopped after this many iterations without a final answer.
    IterationLimit(usize),
    /// History was truncated, dropping this many messages.
    Compacted { removed: usize },
}

//! LLM provider abstraction.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use super::consumer::ToolCallAccumulator;
use super::error::{AgentError, Result};
use super::types::{Message, StopReason, ToolCall, ToolCallFormat, ToolDefinition, Usage};

/// Configuration for an LLM request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model identifier.
    pub model: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Conversation messages, system message first.
    pub messages: Vec<Message>,
    /// Native tool definitions; `None` in inline format.
    pub tools: Option<Vec<ToolDefinition>>,
    /// How tool calls are encoded on the wire.
    pub tool_format: ToolCallFormat,
}

/// A streaming event from the LLM.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    /// A chunk of text content.
    TextDelta(String),
    /// A fragment of a structured tool call, keyed by its position in the reply.
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },
    /// The completion has finished.
    Done {
        stop_reason: Option<StopReason>,
        usage: Option<Usage>,
    },
    /// The provider reported an error mid-stream.
    Error(String),
}

/// A whole, non-streamed reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: Option<StopReason>,
    pub usage: Option<Usage>,
}

/// Stream of completion events.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<CompletionEvent>> + Send>>;

/// Trait for LLM providers.
///
/// Implement this trait to add support for a new LLM provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &'static str;

    /// Stream a completion request.
    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream>;

    /// Request a whole reply.
    ///
    /// The default drains [`LlmProvider::stream`].
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let stream = self.stream(request).await?;
        collect_response(stream).await
    }
}

/// Drain a completion stream into a single response.
pub async fn collect_response(mut stream: CompletionStream) -> Result<CompletionResponse> {
    let mut response = CompletionResponse::default();
    let mut calls = ToolCallAccumulator::default();

    while let Some(event) = stream.next().await {
        match event? {
            CompletionEvent::TextDelta(text) => {
                response.content.get_or_insert_with(String::new).push_str(&text);
            }
            CompletionEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => calls.push(index, id, name, arguments.as_deref()),
            CompletionEvent::Done { stop_reason, usage } => {
                response.stop_reason = stop_reason;
                response.usage = usage;
            }
            CompletionEvent::Error(message) => return Err(AgentError::Transport(message)),
        }
    }

    response.tool_calls = calls.finish();
    Ok(response)
}

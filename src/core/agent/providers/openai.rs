//! `OpenAI` provider implementation.
//!
//! Provides streaming and whole completions via the `OpenAI` Chat Completions
//! API and compatible endpoints (Ollama, LM Studio, vLLM).

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::core::agent::error::{AgentError, Result};
use crate::core::agent::inline;
use crate::core::agent::provider::{
    CompletionEvent, CompletionRequest, CompletionResponse, CompletionStream, LlmProvider,
};
use crate::core::agent::types::{
    Message, Role, StopReason, ToolCall, ToolCallFormat, ToolDefinition, Usage,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// LLM provider for the `OpenAI` API and compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiProvider {
    /// Create a new provider instance.
    ///
    /// # Errors
    ///
    /// Returns error if API key is empty.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(AgentError::ApiKeyMissing);
        }

        Ok(Self {
            http: reqwest::Client::new(),
            api_key: Some(api_key),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Create a provider with optional API key and base URL.
    ///
    /// Use this for OpenAI-compatible providers that may not require an API key
    /// (e.g., local Ollama) or use a different endpoint.
    #[must_use]
    pub fn with_config(api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.filter(|key| !key.is_empty()),
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = &self.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {api_key}"))
                    .map_err(|_| AgentError::ApiKeyMissing)?,
            );
        }
        Ok(headers)
    }

    async fn send(&self, body: &OpenAiRequest) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(url = %url, model = %body.model, stream = body.stream, "sending completion request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AgentError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

// OpenAI request types

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

impl OpenAiRequest {
    fn from_request(request: CompletionRequest, stream: bool) -> Self {
        let tools = match request.tool_format {
            ToolCallFormat::Native => request
                .tools
                .as_deref()
                .filter(|tools| !tools.is_empty())
                .map(convert_tools),
            ToolCallFormat::Inline => None,
        };
        Self {
            messages: convert_messages(&request.messages, request.tool_format),
            model: request.model,
            max_tokens: request.max_tokens,
            tools,
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCallRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OpenAiMessage {
    fn text(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAiToolCallRequest {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// OpenAI response types

#[derive(Debug, Deserialize)]
struct OpenAiChunk {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
    #[serde(default)]
    error: Option<OpenAiError>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAiFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl From<OpenAiUsage> for Usage {
    fn from(usage: OpenAiUsage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiCompletion {
    choices: Vec<OpenAiCompletionChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiCompletionChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseToolCall {
    #[serde(default)]
    id: Option<String>,
    function: OpenAiResponseFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Convert our messages to the format expected by the chat completions API.
///
/// In inline format the endpoint never sees structured tool fields: calls are
/// re-encoded as inline blocks and results become user messages.
fn convert_messages(messages: &[Message], format: ToolCallFormat) -> Vec<OpenAiMessage> {
    messages
        .iter()
        .map(|msg| match (msg.role, format) {
            (Role::System, _) => OpenAiMessage::text("system", msg.text_content()),
            (Role::User, _) => OpenAiMessage::text("user", msg.text_content()),
            (Role::Assistant, ToolCallFormat::Native) => OpenAiMessage {
                role: "assistant",
                content: msg.content.clone(),
                tool_calls: (!msg.tool_calls.is_empty())
                    .then(|| msg.tool_calls.iter().map(convert_call).collect()),
                tool_call_id: None,
            },
            (Role::Assistant, ToolCallFormat::Inline) => {
                let mut text = msg.text_content().to_string();
                if !msg.tool_calls.is_empty() {
                    text.push_str(&inline::encode_calls(&msg.tool_calls));
                }
                OpenAiMessage::text("assistant", text)
            }
            (Role::Tool, ToolCallFormat::Native) => OpenAiMessage {
                role: "tool",
                content: Some(msg.text_content().to_string()),
                tool_calls: None,
                tool_call_id: msg.tool_call_id.clone(),
            },
            (Role::Tool, ToolCallFormat::Inline) => OpenAiMessage::text(
                "user",
                format!(
                    "Tool result for call {}:\n{}",
                    msg.tool_call_id.as_deref().unwrap_or("unknown"),
                    msg.text_content()
                ),
            ),
        })
        .collect()
}

fn convert_call(call: &ToolCall) -> OpenAiToolCallRequest {
    OpenAiToolCallRequest {
        id: call.id.clone(),
        call_type: "function",
        function: OpenAiFunctionCall {
            name: call.name.clone(),
            arguments: call.arguments_json.clone(),
        },
    }
}

/// Convert our tools to the function calling format.
fn convert_tools(tools: &[ToolDefinition]) -> Vec<OpenAiTool> {
    tools
        .iter()
        .map(|t| OpenAiTool {
            tool_type: "function",
            function: OpenAiFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

/// One parsed SSE event.
#[derive(Debug)]
enum SseEvent {
    Chunk(OpenAiChunk),
    Done,
    Skip,
}

/// Parse a single SSE event from the buffer.
///
/// Returns the event (if a complete one is buffered) and the remaining buffer content.
fn parse_sse_event(buffer: &str) -> Option<(SseEvent, String)> {
    let end = buffer.find("\n\n")?;
    let event_str = &buffer[..end];
    let remainder = buffer[end + 2..].to_string();

    let data: Vec<&str> = event_str
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect();

    // Skip comments and non-data events
    if data.is_empty() {
        return Some((SseEvent::Skip, remainder));
    }

    let data = data.join("\n");
    if data.trim() == "[DONE]" {
        return Some((SseEvent::Done, remainder));
    }

    match serde_json::from_str::<OpenAiChunk>(&data) {
        Ok(chunk) => Some((SseEvent::Chunk(chunk), remainder)),
        Err(e) => {
            tracing::debug!(data = %data, error = %e, "failed to parse OpenAI event");
            Some((SseEvent::Skip, remainder))
        }
    }
}

/// Convert finish reason to our stop reason.
fn convert_stop_reason(reason: &str) -> Option<StopReason> {
    match reason {
        "stop" => Some(StopReason::EndTurn),
        "tool_calls" | "function_call" => Some(StopReason::ToolUse),
        "length" => Some(StopReason::MaxTokens),
        _ => None,
    }
}

/// Turn one streamed chunk into completion events.
fn chunk_events(
    chunk: OpenAiChunk,
    stop_reason: &mut Option<StopReason>,
    usage: &mut Option<Usage>,
) -> Vec<CompletionEvent> {
    if let Some(error) = chunk.error {
        return vec![CompletionEvent::Error(error.message)];
    }
    if let Some(chunk_usage) = chunk.usage {
        *usage = Some(chunk_usage.into());
    }

    let mut events = Vec::new();
    for choice in chunk.choices {
        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            events.push(CompletionEvent::TextDelta(text));
        }
        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = tc
                .function
                .map_or((None, None), |f| (f.name, f.arguments));
            events.push(CompletionEvent::ToolCallDelta {
                index: tc.index,
                id: tc.id,
                name,
                arguments,
            });
        }
        if let Some(reason) = choice.finish_reason {
            *stop_reason = convert_stop_reason(&reason);
        }
    }
    events
}

/// Move the complete UTF-8 prefix of `pending` into `out`.
///
/// A multi-byte character split across network chunks stays pending.
/// Invalid sequences become U+FFFD one at a time.
fn decode_utf8(pending: &mut Vec<u8>, out: &mut String) {
    let mut start = 0;
    while start < pending.len() {
        match std::str::from_utf8(&pending[start..]) {
            Ok(text) => {
                out.push_str(text);
                start = pending.len();
            }
            Err(e) => {
                let valid_end = start + e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&pending[start..valid_end]));
                let Some(bad) = e.error_len() else {
                    // incomplete character at the end
                    start = valid_end;
                    break;
                };
                out.push(char::REPLACEMENT_CHARACTER);
                start = valid_end + bad;
            }
        }
    }
    pending.drain(..start);
}

/// Decode an SSE byte stream into completion events, ending with `Done`.
fn sse_events<S, B>(byte_stream: S) -> impl Stream<Item = Result<CompletionEvent>> + Send
where
    S: Stream<Item = reqwest::Result<B>> + Send,
    B: AsRef<[u8]> + Send,
{
    async_stream::try_stream! {
        let mut pending = Vec::new();
        let mut buffer = String::new();
        let mut stop_reason = None;
        let mut usage = None;

        futures::pin_mut!(byte_stream);

        'read: while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk?;
            pending.extend_from_slice(chunk.as_ref());
            decode_utf8(&mut pending, &mut buffer);
            if buffer.contains('\r') {
                buffer = buffer.replace("\r\n", "\n");
            }

            while let Some((event, remainder)) = parse_sse_event(&buffer) {
                buffer = remainder;
                match event {
                    SseEvent::Done => break 'read,
                    SseEvent::Skip => {}
                    SseEvent::Chunk(chunk) => {
                        for event in chunk_events(chunk, &mut stop_reason, &mut usage) {
                            yield event;
                        }
                    }
                }
            }
        }

        yield CompletionEvent::Done { stop_reason, usage };
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        let body = OpenAiRequest::from_request(request, true);
        let response = self.send(&body).await?;
        Ok(Box::pin(sse_events(response.bytes_stream())))
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = OpenAiRequest::from_request(request, false);
        let response = self.send(&body).await?;
        let text = response.text().await?;
        parse_completion(&text)
    }
}

fn parse_completion(text: &str) -> Result<CompletionResponse> {
    let completion: OpenAiCompletion =
        serde_json::from_str(text).map_err(|e| AgentError::Parse(e.to_string()))?;
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AgentError::Parse("response has no choices".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id.unwrap_or_default(),
            name: tc.function.name,
            arguments_json: tc.function.arguments,
        })
        .collect();

    Ok(CompletionResponse {
        content: choice.message.content,
        tool_calls,
        stop_reason: choice.finish_reason.as_deref().and_then(convert_stop_reason),
        usage: completion.usage.map(Usage::from),
    })
}

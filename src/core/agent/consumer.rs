//! Turns a model reply into visible text plus tool calls.

use std::collections::{BTreeMap, HashSet};

use futures::StreamExt;

use super::error::{AgentError, Result};
use super::inline::InlineParser;
use super::progress::ProgressReporter;
use super::provider::{CompletionEvent, CompletionRequest, CompletionStream, LlmProvider};
use super::types::{ChatEvent, StopReason, ToolCall, ToolCallFormat, Usage, generate_call_id};

/// One assistant turn, normalized across tool-call encodings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantTurn {
    /// Visible text, with inline tool-call blocks removed.
    pub text: String,
    /// Requested tool calls in reply order.
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: Option<StopReason>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Default)]
struct PendingCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Merges structured tool-call fragments keyed by index.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    pending: BTreeMap<usize, PendingCall>,
}

impl ToolCallAccumulator {
    /// Merge one fragment. Id and name are kept from the first fragment that
    /// carries them; argument text accumulates.
    pub fn push(
        &mut self,
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<&str>,
    ) {
        let entry = self.pending.entry(index).or_default();
        if entry.id.is_none() {
            entry.id = id.filter(|id| !id.is_empty());
        }
        if entry.name.is_none() {
            entry.name = name.filter(|name| !name.is_empty());
        }
        if let Some(arguments) = arguments {
            entry.arguments.push_str(arguments);
        }
    }

    /// Whether any fragment arrived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Finalize calls in index order. Fragments that never got a name are dropped.
    #[must_use]
    pub fn finish(self) -> Vec<ToolCall> {
        self.pending
            .into_iter()
            .filter_map(|(index, call)| {
                let Some(name) = call.name else {
                    tracing::warn!(index, "dropping tool call fragment without a name");
                    return None;
                };
                let arguments_json = if call.arguments.trim().is_empty() {
                    "{}".to_string()
                } else {
                    call.arguments
                };
                Some(ToolCall {
                    id: call.id.unwrap_or_else(generate_call_id),
                    name,
                    arguments_json,
                })
            })
            .collect()
    }
}

/// Consumes completion events for one assistant turn.
#[derive(Debug)]
pub struct ResponseConsumer {
    format: ToolCallFormat,
    text: String,
    inline: InlineParser,
    structured: ToolCallAccumulator,
    stop_reason: Option<StopReason>,
    usage: Option<Usage>,
    saw_event: bool,
    done: bool,
}

impl ResponseConsumer {
    #[must_use]
    pub fn new(format: ToolCallFormat) -> Self {
        Self {
            format,
            text: String::new(),
            inline: InlineParser::new(),
            structured: ToolCallAccumulator::default(),
            stop_reason: None,
            usage: None,
            saw_event: false,
            done: false,
        }
    }

    /// Handle one event. Provider errors end the turn.
    pub fn on_event(
        &mut self,
        event: CompletionEvent,
        reporter: &mut dyn ProgressReporter,
    ) -> Result<()> {
        self.saw_event = true;
        match event {
            CompletionEvent::TextDelta(text) => self.on_text(&text, reporter),
            CompletionEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => self.structured.push(index, id, name, arguments.as_deref()),
            CompletionEvent::Done { stop_reason, usage } => {
                self.stop_reason = stop_reason;
                if let Some(usage) = usage {
                    reporter.report(ChatEvent::Usage {
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                    });
                    self.usage = Some(usage);
                }
                self.done = true;
            }
            CompletionEvent::Error(message) => return Err(AgentError::Transport(message)),
        }
        Ok(())
    }

    /// Handle a text chunk.
    pub fn on_text(&mut self, chunk: &str, reporter: &mut dyn ProgressReporter) {
        let visible = match self.format {
            ToolCallFormat::Native => chunk.to_string(),
            ToolCallFormat::Inline => self.inline.push(chunk),
        };
        self.emit(visible, reporter);
    }

    /// Record calls that arrived already whole.
    pub fn on_tool_calls(&mut self, calls: Vec<ToolCall>) {
        for call in calls {
            let index = self.structured.pending.len();
            self.structured
                .push(index, Some(call.id), Some(call.name), Some(&call.arguments_json));
        }
    }

    /// Finish the turn.
    #[must_use]
    pub fn finish(mut self, reporter: &mut dyn ProgressReporter) -> AssistantTurn {
        let tail = self.inline.finish();
        self.emit(tail, reporter);

        let mut tool_calls = self.structured.finish();
        let inline_calls = self.inline.take_tool_calls();
        let rejected = self.inline.rejected_blocks();
        if rejected == 0 {
            tool_calls.extend(inline_calls);
        } else if !inline_calls.is_empty() {
            // one malformed block voids every inline call of the turn
            tracing::warn!(
                rejected,
                dropped = inline_calls.len(),
                "malformed inline tool call, ignoring inline calls for this turn"
            );
        }
        dedupe_ids(&mut tool_calls);

        AssistantTurn {
            text: self.text,
            tool_calls,
            stop_reason: self.stop_reason,
            usage: self.usage,
        }
    }

    fn emit(&mut self, visible: String, reporter: &mut dyn ProgressReporter) {
        if visible.is_empty() {
            return;
        }
        self.text.push_str(&visible);
        reporter.report(ChatEvent::Text(visible));
    }
}

/// Ids must be unique within a turn; repeats get a fresh id.
fn dedupe_ids(calls: &mut [ToolCall]) {
    let mut seen = HashSet::new();
    for call in calls {
        if !seen.insert(call.id.clone()) {
            call.id = generate_call_id();
            seen.insert(call.id.clone());
        }
    }
}

/// Drain a completion stream into one assistant turn.
pub async fn consume_stream(
    mut stream: CompletionStream,
    format: ToolCallFormat,
    reporter: &mut dyn ProgressReporter,
) -> Result<AssistantTurn> {
    let mut consumer = ResponseConsumer::new(format);
    while let Some(event) = stream.next().await {
        consumer.on_event(event?, reporter)?;
    }
    if !consumer.saw_event {
        return Err(AgentError::StreamEnded);
    }
    if !consumer.done {
        tracing::debug!("stream closed without a finish event");
    }
    Ok(consumer.finish(reporter))
}

/// Obtain one assistant turn from `provider`, streamed or whole.
pub async fn request_turn(
    provider: &dyn LlmProvider,
    request: CompletionRequest,
    stream: bool,
    reporter: &mut dyn ProgressReporter,
) -> Result<AssistantTurn> {
    let format = request.tool_format;
    if stream {
        let events = provider.stream(request).await?;
        return consume_stream(events, format, reporter).await;
    }

    let response = provider.complete(request).await?;
    let mut consumer = ResponseConsumer::new(format);
    if let Some(content) = response.content.as_deref() {
        consumer.on_text(content, reporter);
    }
    consumer.on_tool_calls(response.tool_calls);
    consumer.stop_reason = response.stop_reason;
    consumer.usage = response.usage;
    if let Some(usage) = response.usage {
        reporter.report(ChatEvent::Usage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        });
    }
    Ok(consumer.finish(reporter))
}

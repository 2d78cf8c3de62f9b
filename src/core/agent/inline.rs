//! Inline tool-call protocol.
//!
//! Transports without native tool calling get the calls embedded in the
//! assistant text:
//!
//! ```text
//! <@TOOL_CALL>{"name": "readFile", "arguments": "{\"path\": \"README.md\"}"}</@TOOL_CALL>
//! ```
//!
//! The block may also hold a JSON array of such objects. [`InlineParser`]
//! consumes the text as it streams in, hands back what is safe to show, and
//! collects the calls. Markers split across chunks are handled by holding back
//! the last `START_MARKER.len() - 1` bytes until more text arrives.

use serde::Deserialize;
use serde_json::Value;

use super::types::{ToolCall, generate_call_id};

/// Opens an inline tool-call block.
pub const START_MARKER: &str = "<@TOOL_CALL>";

/// Closes an inline tool-call block.
pub const END_MARKER: &str = "</@TOOL_CALL>";

/// Incremental parser for assistant text carrying inline tool calls.
#[derive(Debug, Default)]
pub struct InlineParser {
    buffer: String,
    in_block: bool,
    tool_calls: Vec<ToolCall>,
    rejected_blocks: usize,
}

impl InlineParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the text that can be shown now.
    pub fn push(&mut self, chunk: &str) -> String {
        self.buffer.push_str(chunk);
        let mut visible = String::new();

        loop {
            if self.in_block {
                let Some(end) = self.buffer.find(END_MARKER) else {
                    break;
                };
                let block = self.buffer[..end].to_string();
                self.buffer.drain(..end + END_MARKER.len());
                self.in_block = false;
                self.close_block(&block, &mut visible);
            } else if let Some(start) = self.buffer.find(START_MARKER) {
                visible.push_str(&self.buffer[..start]);
                self.buffer.drain(..start + START_MARKER.len());
                self.in_block = true;
            } else {
                // The tail may be the beginning of a marker split across chunks.
                if self.buffer.len() > START_MARKER.len() {
                    let mut cut = self.buffer.len() - START_MARKER.len() + 1;
                    while !self.buffer.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    visible.extend(self.buffer.drain(..cut));
                }
                break;
            }
        }

        visible
    }

    /// Flush the remaining buffer at end of stream.
    ///
    /// A block still open at this point is parsed as if it had been closed.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.buffer);
        if !self.in_block {
            return rest;
        }
        self.in_block = false;
        let mut visible = String::new();
        self.close_block(&rest, &mut visible);
        visible
    }

    /// Calls collected so far, in the order they appeared.
    pub fn take_tool_calls(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.tool_calls)
    }

    /// Number of blocks that failed to parse and were shown as text.
    #[must_use]
    pub const fn rejected_blocks(&self) -> usize {
        self.rejected_blocks
    }

    fn close_block(&mut self, block: &str, visible: &mut String) {
        if let Some(calls) = parse_block(block) {
            tracing::debug!(count = calls.len(), "parsed inline tool calls");
            self.tool_calls.extend(calls);
        } else {
            tracing::warn!(len = block.len(), "malformed inline tool call, keeping as text");
            self.rejected_blocks += 1;
            visible.push_str(block);
        }
    }
}

#[derive(Debug, Deserialize)]
struct InlineCall {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// Parse the JSON between the markers into tool calls.
///
/// Returns `None` when the block is not a call object or a non-empty array
/// of them.
#[must_use]
pub fn parse_block(block: &str) -> Option<Vec<ToolCall>> {
    let entries = match serde_json::from_str::<Value>(block.trim()).ok()? {
        Value::Array(items) if !items.is_empty() => items,
        object @ Value::Object(_) => vec![object],
        _ => return None,
    };

    entries
        .into_iter()
        .map(|entry| {
            let call: InlineCall = serde_json::from_value(entry).ok()?;
            if call.name.trim().is_empty() {
                return None;
            }
            Some(ToolCall {
                id: call
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(generate_call_id),
                name: call.name,
                arguments_json: arguments_to_json(call.arguments),
            })
        })
        .collect()
}

/// `arguments` is normally a JSON-encoded string; absent means no arguments.
fn arguments_to_json(arguments: Option<Value>) -> String {
    match arguments {
        None | Some(Value::Null) => "{}".to_string(),
        Some(Value::String(s)) if s.trim().is_empty() => "{}".to_string(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

/// Encode calls as an inline block, for replaying history to inline transports.
#[must_use]
pub fn encode_calls(calls: &[ToolCall]) -> String {
    let entries: Vec<Value> = calls
        .iter()
        .map(|call| {
            serde_json::json!({
                "id": call.id,
                "name": call.name,
                "arguments": call.arguments_json,
            })
        })
        .collect();
    let body = if let [single] = entries.as_slice() {
        single.to_string()
    } else {
        Value::Array(entries).to_string()
    };
    format!("{START_MARKER}{body}{END_MARKER}")
}

/// Prompt section teaching the model the inline protocol.
#[must_use]
pub fn protocol_instructions() -> String {
    format!(
        "## Calling Tools\n\n\
         To call a tool, write a block like this anywhere in your reply:\n\n\
         {START_MARKER}{{\"name\": \"<tool name>\", \"arguments\": \"<arguments as a JSON string>\"}}{END_MARKER}\n\n\
         `arguments` is itself a JSON-encoded string, for example \"{{\\\"path\\\": \\\"src/main.rs\\\"}}\". \
         To call several tools at once, put a JSON array of these objects inside one block. \
         Tool results arrive in the next message. When no more tools are needed, answer without a block."
    )
}

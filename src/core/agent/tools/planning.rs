use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Tool, ToolContext, parse_args};
use crate::core::agent::error::ToolError;
use crate::core::agent::mode::{Mode, SWITCH_MODE_TOOL};

#[derive(Debug, Deserialize)]
struct SwitchArgs {
    mode: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Switches between plan and execute mode.
///
/// The tool only validates the target; the dispatcher applies a successful
/// result to the agent.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchModeTool;

#[async_trait]
impl Tool for SwitchModeTool {
    fn name(&self) -> &str {
        SWITCH_MODE_TOOL
    }

    fn description(&self) -> &str {
        "Switch the agent between plan mode (break work into tasks first) and execute mode (act directly)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "mode": {
                    "type": "string",
                    "enum": ["plan", "execute"],
                    "description": "Mode to switch to"
                },
                "reason": {
                    "type": "string",
                    "description": "Why the switch is needed"
                }
            },
            "required": ["mode"]
        })
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let args: SwitchArgs = parse_args(args)?;
        let mode: Mode = args.mode.parse().map_err(ToolError::InvalidArguments)?;

        tracing::info!(from = %ctx.mode, to = %mode, reason = ?args.reason, "mode switch requested");

        Ok(json!({ "success": true, "mode": mode }))
    }
}

/// Read a successful switch result back into a mode.
#[must_use]
pub fn switched_mode(result: &Value) -> Option<Mode> {
    if result.get("success").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    result.get("mode")?.as_str()?.parse().ok()
}

#[derive(Debug, Deserialize)]
struct ThinkArgs {
    thought: String,
}

/// A scratchpad: the model records reasoning without side effects.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThinkingTool;

#[async_trait]
impl Tool for ThinkingTool {
    fn name(&self) -> &str {
        "thinkingTool"
    }

    fn description(&self) -> &str {
        "Think through a problem step by step. Use it to reason before acting; it changes nothing."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "thought": {
                    "type": "string",
                    "description": "Your reasoning"
                }
            },
            "required": ["thought"]
        })
    }

    async fn invoke(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let ThinkArgs { thought } = parse_args(args)?;
        tracing::debug!(chars = thought.chars().count(), "recorded thought");
        Ok(json!({ "success": true, "thought": thought }))
    }
}

//! Plan/execute mode and system prompt assembly.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use super::inline;
use super::types::{ToolCallFormat, ToolDefinition};

/// Name of the tool that switches modes.
pub const SWITCH_MODE_TOOL: &str = "switchMode";

/// Agent operating mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Break the task down before acting.
    Plan,
    /// Act directly.
    #[default]
    Execute,
}

impl Mode {
    /// Lowercase name used in prompts and tool arguments.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Execute => "execute",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "plan" => Ok(Self::Plan),
            "execute" | "exec" => Ok(Self::Execute),
            other => Err(format!("unknown mode '{other}', expected plan or execute")),
        }
    }
}

/// Default prompt fragment for plan mode.
pub const DEFAULT_PLAN_PROMPT: &str = "\
## Plan Mode

You are in PLAN MODE. Break the request into concrete steps before touching anything.

Workflow:
1. Inspect the project with read-only tools
2. Record the steps with taskManager
3. Call switchMode with mode \"execute\" when the plan is ready";

/// Default prompt fragment for execute mode.
pub const DEFAULT_EXECUTE_PROMPT: &str = "\
## Execute Mode

You are in EXECUTE MODE. Act directly: read, edit and run what the task needs.
Keep answers short. Call switchMode with mode \"plan\" when a task is large enough to need a plan.";

/// Holds the active mode and the prompt fragments for both modes.
#[derive(Debug, Clone)]
pub struct ModeController {
    mode: Mode,
    preamble: String,
    plan_prompt: String,
    execute_prompt: String,
}

impl ModeController {
    /// Create a controller starting in `mode`.
    #[must_use]
    pub fn new(mode: Mode, preamble: impl Into<String>) -> Self {
        Self {
            mode,
            preamble: preamble.into(),
            plan_prompt: DEFAULT_PLAN_PROMPT.to_string(),
            execute_prompt: DEFAULT_EXECUTE_PROMPT.to_string(),
        }
    }

    /// Replace the prompt fragments.
    #[must_use]
    pub fn with_prompts(mut self, plan: impl Into<String>, execute: impl Into<String>) -> Self {
        self.plan_prompt = plan.into();
        self.execute_prompt = execute.into();
        self
    }

    /// The active mode.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Switch to `mode`. Returns true when the mode actually changed.
    pub fn switch(&mut self, mode: Mode) -> bool {
        if mode == self.mode {
            return false;
        }
        tracing::info!(from = %self.mode, to = %mode, "switching mode");
        self.mode = mode;
        true
    }

    /// Prompt fragment for the active mode.
    #[must_use]
    pub fn fragment(&self) -> &str {
        match self.mode {
            Mode::Plan => &self.plan_prompt,
            Mode::Execute => &self.execute_prompt,
        }
    }

    /// Build the full system prompt for the active mode.
    #[must_use]
    pub fn system_prompt(&self, tools: &[ToolDefinition], format: ToolCallFormat) -> String {
        let mut prompt = String::new();
        if !self.preamble.is_empty() {
            prompt.push_str(&self.preamble);
            prompt.push_str("\n\n");
        }
        prompt.push_str(self.fragment());
        prompt.push_str("\n\n");
        prompt.push_str(&tool_section(tools));
        if format == ToolCallFormat::Inline {
            prompt.push_str("\n\n");
            prompt.push_str(&inline::protocol_instructions());
        }
        prompt
    }
}

/// Render tool definitions into prompt text.
fn tool_section(tools: &[ToolDefinition]) -> String {
    let mut section = String::from("## Tools\n");
    if tools.is_empty() {
        section.push_str("\nNo tools are available.");
        return section;
    }
    for tool in tools {
        let schema = serde_json::to_string(&tool.input_schema).unwrap_or_default();
        let _ = write!(
            section,
            "\n### {}\n{}\nParameters: {schema}\n",
            tool.name, tool.description
        );
    }
    section.truncate(section.trim_end().len());
    section
}

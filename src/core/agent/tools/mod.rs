//! Tool trait, registry and built-in tools.

mod files;
mod planning;
mod shell;
mod tasks;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::ToolError;
use super::mode::Mode;
use super::types::ToolDefinition;

pub use files::{ProjectStructureTool, ReadFileTool, WriteFileTool};
pub use planning::{SwitchModeTool, ThinkingTool, switched_mode};
pub use shell::{ShellTool, is_read_only};
pub use tasks::{Subtask, TASKS_FILE, Task, TaskList, TaskManagerTool};

/// Default time budget for a shell command.
pub const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(120);

/// A capability the model can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry name, as the model calls it.
    fn name(&self) -> &str;

    /// Description sent to the model.
    fn description(&self) -> &str;

    /// JSON schema for the arguments object.
    fn input_schema(&self) -> Value;

    /// Whether the tool is offered in `mode`.
    fn available_in(&self, _mode: Mode) -> bool {
        true
    }

    /// Run the tool.
    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError>;

    /// Definition sent to the model.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// What a tool invocation can see of the agent.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Directory relative paths resolve against.
    pub working_dir: PathBuf,
    /// Mode at dispatch time.
    pub mode: Mode,
    /// Open-ended values supplied by the embedding application.
    pub extensions: BTreeMap<String, Value>,
}

impl ToolContext {
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>, mode: Mode) -> Self {
        Self {
            working_dir: working_dir.into(),
            mode,
            extensions: BTreeMap::new(),
        }
    }

    /// Resolve `path` against the working directory.
    #[must_use]
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }
}

/// Name-ordered set of tools.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every built-in tool.
    #[must_use]
    pub fn with_builtins(shell_timeout: Duration) -> Self {
        let mut registry = Self::new();
        registry.register(SwitchModeTool);
        registry.register(ThinkingTool);
        registry.register(ProjectStructureTool);
        registry.register(ReadFileTool);
        registry.register(WriteFileTool);
        registry.register(ShellTool::new(shell_timeout));
        registry.register(TaskManagerTool::new());
        registry
    }

    /// Add a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// Add a shared tool, replacing any tool with the same name.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "replaced tool");
        }
    }

    /// Look a tool up by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Definitions of the tools offered in `mode`, in name order.
    #[must_use]
    pub fn definitions(&self, mode: Mode) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .filter(|tool| tool.available_in(mode))
            .map(|tool| tool.definition())
            .collect()
    }

    /// All registered names, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Deserialize tool arguments into a typed struct.
pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

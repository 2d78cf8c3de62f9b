//! Agent orchestration loop.
//!
//! One [`Agent::chat`] call runs a turn: it asks the model for a reply,
//! dispatches any tool calls the reply carries, folds the results back into
//! the conversation and repeats until the model answers without tools.

mod consumer;
mod conversation;
mod dispatch;
mod error;
pub mod inline;
mod mode;
mod progress;
mod provider;
pub mod providers;
pub mod tools;
mod types;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

pub use consumer::{AssistantTurn, ResponseConsumer, ToolCallAccumulator, request_turn};
pub use conversation::Conversation;
pub use dispatch::{DispatchOutcome, dispatch, parse_arguments};
pub use error::{AgentError, Result, ToolError};
pub use mode::{DEFAULT_EXECUTE_PROMPT, DEFAULT_PLAN_PROMPT, Mode, ModeController, SWITCH_MODE_TOOL};
pub use progress::{NoopReporter, ProgressReporter};
pub use provider::{
    CompletionEvent, CompletionRequest, CompletionResponse, CompletionStream, LlmProvider,
    collect_response,
};
pub use providers::OpenAiProvider;
pub use tools::{Tool, ToolContext, ToolRegistry};
pub use types::{
    ChatEvent, Message, Role, StopReason, ToolCall, ToolCallFormat, ToolCallResult,
    ToolDefinition, Usage,
};

/// Per-agent knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub model: String,
    pub max_tokens: u32,
    /// Request streamed replies.
    pub stream: bool,
    pub tool_format: ToolCallFormat,
    /// Model requests allowed per turn.
    pub max_iterations: usize,
    /// History length that triggers compaction.
    pub compaction_threshold: usize,
    /// Messages kept after compaction, besides the system message.
    pub compaction_keep: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            max_tokens: 8192,
            stream: true,
            tool_format: ToolCallFormat::Native,
            max_iterations: 25,
            compaction_threshold: 60,
            compaction_keep: 40,
        }
    }
}

/// Where the loop is within a turn.
#[derive(Debug)]
enum LoopState {
    AwaitingResponse,
    HasToolCalls(Vec<ToolCall>),
    Done(String),
}

/// Agent that orchestrates conversation with an LLM.
pub struct Agent {
    provider: Box<dyn LlmProvider>,
    conversation: Conversation,
    tools: ToolRegistry,
    modes: ModeController,
    settings: AgentSettings,
    working_dir: PathBuf,
    extensions: BTreeMap<String, Value>,
    tool_history: Vec<ToolCallResult>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("provider", &self.provider.name())
            .field("messages", &self.conversation.len())
            .field("tools", &self.tools)
            .field("mode", &self.modes.mode())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Create an agent with the built-in tools, starting in execute mode in
    /// the current directory.
    pub fn new(provider: Box<dyn LlmProvider>, settings: AgentSettings) -> Self {
        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let preamble = default_preamble(&settings.model, &working_dir);
        Self {
            provider,
            conversation: Conversation::new(),
            tools: ToolRegistry::with_builtins(tools::DEFAULT_SHELL_TIMEOUT),
            modes: ModeController::new(Mode::default(), preamble),
            settings,
            working_dir,
            extensions: BTreeMap::new(),
            tool_history: Vec::new(),
        }
    }

    /// Replace the tool registry.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Replace the mode controller (start mode, preamble and prompt fragments).
    #[must_use]
    pub fn with_modes(mut self, modes: ModeController) -> Self {
        self.modes = modes;
        self
    }

    /// Resolve tool paths against `dir`.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Add a value every tool invocation can read from its context.
    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Run one user turn to completion and return the final answer.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider fails. The user message stays in
    /// the history; messages appended before the failure are kept.
    pub async fn chat(
        &mut self,
        message: &str,
        reporter: &mut dyn ProgressReporter,
    ) -> Result<String> {
        if self.conversation.is_empty() {
            self.refresh_system_prompt();
        }
        self.conversation.add_user_message(message);

        let mut iterations = 0;
        let mut state = LoopState::AwaitingResponse;
        let answer = loop {
            state = match state {
                LoopState::AwaitingResponse => {
                    if iterations >= self.settings.max_iterations {
                        tracing::warn!(iterations, "iteration limit reached, ending turn");
                        reporter.report(ChatEvent::IterationLimit(iterations));
                        break self
                            .conversation
                            .last_assistant_text()
                            .unwrap_or_default()
                            .to_string();
                    }
                    iterations += 1;

                    let request = self.next_request();
                    let turn = request_turn(
                        self.provider.as_ref(),
                        request,
                        self.settings.stream,
                        reporter,
                    )
                    .await?;
                    tracing::debug!(
                        iteration = iterations,
                        calls = turn.tool_calls.len(),
                        stop_reason = ?turn.stop_reason,
                        "assistant turn received"
                    );

                    if turn.tool_calls.is_empty() {
                        self.conversation.add_assistant_message(turn.text.clone());
                        LoopState::Done(turn.text)
                    } else {
                        self.conversation
                            .add_assistant_calls(turn.text, turn.tool_calls.clone());
                        LoopState::HasToolCalls(turn.tool_calls)
                    }
                }
                LoopState::HasToolCalls(calls) => {
                    self.run_tools(&calls, reporter).await;
                    LoopState::AwaitingResponse
                }
                LoopState::Done(text) => break text,
            };
        };

        let removed = self.conversation.compact(
            self.settings.compaction_threshold,
            self.settings.compaction_keep,
        );
        if removed > 0 {
            reporter.report(ChatEvent::Compacted { removed });
        }

        Ok(answer)
    }

    async fn run_tools(&mut self, calls: &[ToolCall], reporter: &mut dyn ProgressReporter) {
        let ctx = ToolContext {
            working_dir: self.working_dir.clone(),
            mode: self.modes.mode(),
            extensions: self.extensions.clone(),
        };
        let outcome = dispatch(calls, &self.tools, &ctx, reporter).await;

        self.conversation.extend(outcome.messages);
        self.tool_history.extend(outcome.results);

        if let Some(mode) = outcome.mode_switch {
            if self.modes.switch(mode) {
                reporter.report(ChatEvent::ModeChanged(mode));
            }
        }
    }

    /// Regenerate the system message and build the next request.
    fn next_request(&mut self) -> CompletionRequest {
        let definitions = self.refresh_system_prompt();
        CompletionRequest {
            model: self.settings.model.clone(),
            max_tokens: self.settings.max_tokens,
            messages: self.conversation.messages().to_vec(),
            tools: match self.settings.tool_format {
                ToolCallFormat::Native => Some(definitions),
                ToolCallFormat::Inline => None,
            },
            tool_format: self.settings.tool_format,
        }
    }

    fn refresh_system_prompt(&mut self) -> Vec<ToolDefinition> {
        let definitions = self.tools.definitions(self.modes.mode());
        let prompt = self
            .modes
            .system_prompt(&definitions, self.settings.tool_format);
        self.conversation.set_system(prompt);
        definitions
    }

    /// Clear conversation history and the tool log.
    pub fn clear(&mut self) {
        self.conversation.clear();
        self.tool_history.clear();
    }

    /// Save conversation history to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_history(&self, path: &Path) -> Result<()> {
        self.conversation
            .save(path)
            .map_err(|e| AgentError::Config(e.to_string()))
    }

    /// Load conversation history from `path`.
    ///
    /// The saved system message is replaced with a fresh one for the current
    /// mode and tools.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn load_history(&mut self, path: &Path) -> Result<()> {
        self.conversation =
            Conversation::load(path).map_err(|e| AgentError::Config(e.to_string()))?;
        if !self.conversation.tool_links_valid() {
            tracing::warn!(path = %path.display(), "saved history has unmatched tool results");
        }
        if !self.conversation.is_empty() {
            self.refresh_system_prompt();
        }
        Ok(())
    }

    /// Check if conversation has any history.
    #[must_use]
    pub fn has_history(&self) -> bool {
        !self.conversation.is_empty()
    }

    #[must_use]
    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Every tool call dispatched since the last clear, with its result.
    #[must_use]
    pub fn tool_history(&self) -> &[ToolCallResult] {
        &self.tool_history
    }

    /// Get the current agent mode.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.modes.mode()
    }

    /// Switch mode on behalf of the user. Takes effect at the next request.
    pub fn set_mode(&mut self, mode: Mode) -> bool {
        self.modes.switch(mode)
    }

    #[must_use]
    pub const fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    #[must_use]
    pub const fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Get the current model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.settings.model
    }

    /// Get the current provider name.
    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }
}

/// Identity and environment lines that open every system prompt.
#[must_use]
pub fn default_preamble(model: &str, working_dir: &Path) -> String {
    format!(
        "You are {model}, a software engineering agent accessed through ferry.\n\n\
         Working directory: {}\nPlatform: {}",
        working_dir.display(),
        std::env::consts::OS
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;

    /// Replays one scripted reply per request.
    struct Scripted {
        replies: Mutex<Vec<Vec<CompletionEvent>>>,
        requests: Arc<Mutex<Vec<CompletionRequest>>>,
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
            self.requests.lock().push(request);
            let mut replies = self.replies.lock();
            if replies.is_empty() {
                return Err(AgentError::Transport("script exhausted".to_string()));
            }
            let events = replies.remove(0);
            Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
        }
    }

    fn text(s: &str) -> Vec<CompletionEvent> {
        vec![CompletionEvent::TextDelta(s.to_string())]
    }

    fn agent(replies: Vec<Vec<CompletionEvent>>) -> (Agent, Arc<Mutex<Vec<CompletionRequest>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let provider = Scripted {
            replies: Mutex::new(replies),
            requests: Arc::clone(&requests),
        };
        let agent = Agent::new(Box::new(provider), AgentSettings::default())
            .with_modes(ModeController::new(Mode::Execute, "preamble").with_prompts("PLAN", "EXEC"));
        (agent, requests)
    }

    #[tokio::test]
    async fn plain_reply_ends_turn() {
        let (mut agent, requests) = agent(vec![text("hello")]);
        let answer = agent.chat("hi", &mut NoopReporter).await.unwrap();

        assert_eq!(answer, "hello");
        let roles: Vec<Role> = agent.conversation().messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(requests.lock().len(), 1);
        assert!(requests.lock()[0].tools.is_some());
    }

    #[tokio::test]
    async fn system_message_is_regenerated_not_appended() {
        let (mut agent, _) = agent(vec![text("one"), text("two")]);
        agent.chat("a", &mut NoopReporter).await.unwrap();
        agent.set_mode(Mode::Plan);
        agent.chat("b", &mut NoopReporter).await.unwrap();

        let messages = agent.conversation().messages();
        assert_eq!(messages.len(), 5);
        assert_eq!(
            messages.iter().filter(|m| m.role == Role::System).count(),
            1
        );
        assert!(messages[0].text_content().contains("PLAN"));
    }

    #[tokio::test]
    async fn inline_format_omits_native_tools() {
        let (agent, requests) = agent(vec![text("ok")]);
        let mut agent = Agent {
            settings: AgentSettings {
                tool_format: ToolCallFormat::Inline,
                ..AgentSettings::default()
            },
            ..agent
        };
        agent.chat("hi", &mut NoopReporter).await.unwrap();

        let request = requests.lock()[0].clone();
        assert!(request.tools.is_none());
        assert!(request.messages[0].text_content().contains(inline::START_MARKER));
    }

    #[tokio::test]
    async fn clear_resets_history() {
        let (mut agent, _) = agent(vec![text("one")]);
        agent.chat("a", &mut NoopReporter).await.unwrap();
        agent.clear();
        assert!(!agent.has_history());
        assert!(agent.tool_history().is_empty());
    }

    #[tokio::test]
    async fn history_round_trips_with_fresh_system_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversation.json");

        let (mut first, _) = agent(vec![text("saved")]);
        first.chat("remember", &mut NoopReporter).await.unwrap();
        first.save_history(&path).unwrap();

        let (mut second, _) = agent(Vec::new());
        second.set_mode(Mode::Plan);
        second.load_history(&path).unwrap();

        let messages = second.conversation().messages();
        assert_eq!(messages.len(), 3);
        assert!(messages[0].text_content().contains("PLAN"));
        assert_eq!(messages[2].text_content(), "saved");
    }

    #[test]
    fn preamble_names_model_and_directory() {
        let preamble = default_preamble("gpt-4o", Path::new("/work"));
        assert!(preamble.starts_with("You are gpt-4o"));
        assert!(preamble.contains("/work"));
    }
}

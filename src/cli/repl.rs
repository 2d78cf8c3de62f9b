//! Line-oriented chat session and terminal rendering of agent events.

use std::io::Write;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::core::agent::{Agent, ChatEvent, Mode};

/// Longest tool output echoed to the terminal.
const TOOL_PREVIEW_CHARS: usize = 200;

/// One line of REPL input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    /// Blank line.
    Empty,
    Exit,
    Clear,
    /// Switch to a mode.
    Mode(Mode),
    /// Show the current mode.
    ShowMode,
    /// A slash command that could not be understood.
    Invalid(String),
    /// Text for the model.
    Prompt(String),
}

impl ReplCommand {
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Prompt(line.to_string());
        };

        let mut parts = command.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("exit" | "quit"), None) => Self::Exit,
            (Some("clear"), None) => Self::Clear,
            (Some("mode"), None) => Self::ShowMode,
            (Some("mode"), Some(target)) => match target.parse() {
                Ok(mode) => Self::Mode(mode),
                Err(e) => Self::Invalid(e),
            },
            _ => Self::Invalid(format!(
                "unknown command '/{command}', try /clear, /mode plan|execute or /exit"
            )),
        }
    }
}

/// Writes agent events to a terminal: answer text to `out`, tool activity to
/// `err`.
pub struct TerminalRenderer<O, E> {
    out: O,
    err: E,
}

impl TerminalRenderer<std::io::Stdout, std::io::Stderr> {
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(std::io::stdout(), std::io::stderr())
    }
}

impl<O: Write, E: Write> TerminalRenderer<O, E> {
    pub const fn new(out: O, err: E) -> Self {
        Self { out, err }
    }

    pub fn render(&mut self, event: ChatEvent) {
        // terminal writes are best effort
        let _ = match event {
            ChatEvent::Text(text) => write!(self.out, "{text}").and_then(|()| self.out.flush()),
            ChatEvent::ToolStart { name, .. } => writeln!(self.err, "\n[{name}]"),
            ChatEvent::ToolCall {
                name,
                output,
                is_error: true,
                ..
            } => writeln!(self.err, "[{name} failed] {}", preview(&output)),
            ChatEvent::ToolCall { name, output, .. } => {
                writeln!(self.err, "[{name} done] {}", preview(&output))
            }
            ChatEvent::ModeChanged(mode) => writeln!(self.err, "[mode: {mode}]"),
            ChatEvent::IterationLimit(n) => {
                writeln!(self.err, "[stopped after {n} model requests]")
            }
            ChatEvent::Compacted { removed } => {
                writeln!(self.err, "[dropped {removed} old messages]")
            }
            ChatEvent::Usage {
                input_tokens,
                output_tokens,
            } => {
                tracing::debug!(input_tokens, output_tokens, "usage");
                Ok(())
            }
        };
    }

    /// Finish the answer line.
    pub fn end_turn(&mut self) {
        let _ = writeln!(self.out);
    }

    pub fn into_inner(self) -> (O, E) {
        (self.out, self.err)
    }
}

fn preview(output: &str) -> String {
    let line = output.lines().next().unwrap_or_default();
    if line.chars().count() > TOOL_PREVIEW_CHARS || output.lines().nth(1).is_some() {
        let cut: String = line.chars().take(TOOL_PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}

/// Run an interactive session until `/exit` or end of input.
///
/// The conversation is saved to `history_path` after every turn.
///
/// # Errors
///
/// Returns an error if stdin cannot be read.
pub async fn run(agent: &mut Agent, history_path: &Path) -> anyhow::Result<()> {
    let mut renderer = TerminalRenderer::stdio();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    eprintln!(
        "ferry {} ({} via {}, {} mode). /exit to quit.",
        env!("CARGO_PKG_VERSION"),
        agent.model(),
        agent.provider_name(),
        agent.mode()
    );

    loop {
        eprint!("> ");
        std::io::stderr().flush().ok();

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match ReplCommand::parse(&line) {
            ReplCommand::Empty => {}
            ReplCommand::Exit => break,
            ReplCommand::Clear => {
                agent.clear();
                save(agent, history_path);
                eprintln!("conversation cleared");
            }
            ReplCommand::ShowMode => eprintln!("mode: {}", agent.mode()),
            ReplCommand::Mode(mode) => {
                agent.set_mode(mode);
                eprintln!("mode: {}", agent.mode());
            }
            ReplCommand::Invalid(message) => eprintln!("{message}"),
            ReplCommand::Prompt(prompt) => {
                let result = agent
                    .chat(&prompt, &mut |event| renderer.render(event))
                    .await;
                renderer.end_turn();
                if let Err(e) = result {
                    eprintln!("error: {e}");
                }
                save(agent, history_path);
            }
        }
    }

    Ok(())
}

fn save(agent: &Agent, history_path: &Path) {
    if let Err(e) = agent.save_history(history_path) {
        tracing::warn!(path = %history_path.display(), error = %e, "failed to save history");
    }
}

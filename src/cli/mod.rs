//! CLI command parsing and execution.

pub mod repl;

use clap::{Parser, Subcommand};

use crate::config::AgentConfig;
use crate::core::agent::{Mode, ToolCallFormat};

/// ferry - a tool-using coding agent for the terminal.
#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Tool-using coding agent for the terminal")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Run one turn with this prompt and print the answer.
    pub prompt: Option<String>,

    /// Increase logging verbosity.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Override the configured model.
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Embed tool calls in the reply text instead of native tool calling.
    #[arg(long, global = true)]
    pub inline: bool,

    /// Wait for whole replies instead of streaming.
    #[arg(long, global = true)]
    pub no_stream: bool,

    /// Start in plan mode.
    #[arg(long, global = true)]
    pub plan: bool,

    /// Continue from the saved conversation.
    #[arg(short, long, global = true)]
    pub r#continue: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded agent config.
    pub fn apply_overrides(&self, config: &mut AgentConfig) {
        if let Some(model) = &self.model {
            config.model.clone_from(model);
        }
        if self.inline {
            config.tool_format = ToolCallFormat::Inline;
        }
        if self.no_stream {
            config.stream = false;
        }
        if self.plan {
            config.mode = Mode::Plan;
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive chat session.
    Chat,

    /// Manage configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Manage the saved conversation.
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the current configuration.
    Show,

    /// Show the configuration file path.
    Path,
}

#[derive(Subcommand)]
pub enum HistoryCommands {
    /// Delete the saved conversation.
    Clear,
}

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::process::Command;

use super::{Tool, ToolContext, parse_args};
use crate::core::agent::error::ToolError;
use crate::core::agent::mode::Mode;

/// Longest output returned to the model per stream.
const MAX_OUTPUT_CHARS: usize = 30_000;

/// Check if a shell command is read-only (safe to run while planning).
///
/// Pipelines are allowed when every stage is read-only. Chaining, command
/// substitution, backgrounding and output redirects are not.
#[must_use]
pub fn is_read_only(command: &str) -> bool {
    let command = command.trim();
    if command.is_empty() || has_control_syntax(command) {
        return false;
    }
    // `||` leaves an empty stage and is rejected there
    command.split('|').all(|stage| is_read_only_stage(stage.trim()))
}

fn has_control_syntax(command: &str) -> bool {
    ['>', ';', '&', '`', '\n'].iter().any(|c| command.contains(*c)) || command.contains("$(")
}

fn is_read_only_stage(stage: &str) -> bool {
    let mut words = stage.split_whitespace();
    let Some(first_word) = words.next() else {
        return false;
    };
    let args: Vec<&str> = words.collect();
    let has_arg = |flags: &[&str]| {
        args.iter()
            .any(|arg| flags.iter().any(|flag| arg == flag || arg.starts_with(&format!("{flag}="))))
    };

    let read_only_commands = [
        "ls", "cat", "head", "tail", "less", "more", "grep", "rg", "find", "fd", "pwd", "echo",
        "printf", "wc", "sort", "uniq", "diff", "file", "stat", "which", "whereis", "type", "date",
        "whoami", "printenv", "uname", "df", "du", "ps", "tree",
    ];

    if read_only_commands.contains(&first_word) {
        return match first_word {
            "find" => !has_arg(&[
                "-delete", "-exec", "-execdir", "-ok", "-okdir", "-fprint", "-fprint0", "-fprintf",
                "-fls",
            ]),
            "fd" => !has_arg(&["-x", "--exec", "-X", "--exec-batch"]),
            "rg" => !has_arg(&["--pre"]),
            "sort" => !has_arg(&["-o", "--output"]),
            "tree" => !has_arg(&["-o"]),
            "date" => !has_arg(&["-s", "--set"]),
            _ => true,
        };
    }

    let subcommand = args.first().copied().unwrap_or("");
    let rest = &args[args.len().min(1)..];

    match first_word {
        "git" => match subcommand {
            "status" | "log" | "diff" | "show" | "blame" => true,
            // listing only: any name or delete/rename flag modifies refs
            "branch" | "tag" | "remote" => rest.iter().all(|arg| {
                arg.starts_with('-')
                    && !["-d", "-D", "--delete", "-m", "-M", "--move", "-c", "-C", "--copy"]
                        .contains(arg)
            }),
            "stash" => rest.first() == Some(&"list"),
            _ => false,
        },
        "cargo" => {
            (["check", "clippy", "doc", "tree", "metadata"].contains(&subcommand)
                && !has_arg(&["--fix"]))
                || (subcommand == "fmt" && has_arg(&["--check"]))
        }
        _ => false,
    }
}

#[derive(Debug, Deserialize)]
struct ShellArgs {
    command: String,
}

/// Runs a command through `sh -c` in the working directory.
#[derive(Debug, Clone)]
pub struct ShellTool {
    timeout: Duration,
}

impl ShellTool {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the project directory and return its exit code, stdout and stderr. \
         In plan mode only read-only commands are allowed."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let ShellArgs { command } = parse_args(args)?;
        if command.trim().is_empty() {
            return Err(ToolError::InvalidArguments("command is empty".to_string()));
        }

        if ctx.mode == Mode::Plan && !is_read_only(&command) {
            return Err(ToolError::Execution(
                "In plan mode, only read-only commands are allowed. Switch to execute mode first."
                    .to_string(),
            ));
        }

        tracing::info!(command = %command, "executing shell command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&ctx.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| ToolError::Timeout(self.timeout.as_secs()))??;

        Ok(json!({
            "exitCode": output.status.code(),
            "stdout": truncate(&String::from_utf8_lossy(&output.stdout)),
            "stderr": truncate(&String::from_utf8_lossy(&output.stderr)),
        }))
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_OUTPUT_CHARS {
        return text.to_string();
    }
    let kept: String = text.chars().take(MAX_OUTPUT_CHARS).collect();
    format!("{kept}\n... (output truncated, {} bytes total)", text.len())
}

//! Plan-mode task tracking persisted as Markdown.
//!
//! ```text
//! # Tasks
//!
//! ## Task 1: Add config loading
//! - [x] Define the config struct
//! - [ ] Merge the project file
//! ```

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Tool, ToolContext, parse_args};
use crate::core::agent::error::ToolError;
use crate::core::agent::mode::Mode;

/// Location of the task file under the working directory.
pub const TASKS_FILE: &str = ".ferry/tasks.md";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subtask {
    pub text: String,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub title: String,
    pub subtasks: Vec<Subtask>,
}

impl Task {
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.subtasks.iter().all(|s| s.done)
    }
}

/// Ordered list of tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskList {
    pub tasks: Vec<Task>,
}

impl TaskList {
    /// Parse the Markdown form. Lines that are neither headings nor
    /// checklist items are ignored.
    #[must_use]
    pub fn parse(markdown: &str) -> Self {
        let mut tasks: Vec<Task> = Vec::new();
        for line in markdown.lines() {
            let line = line.trim_end();
            if let Some(heading) = line.strip_prefix("## ") {
                tasks.push(Task {
                    title: strip_task_number(heading).to_string(),
                    subtasks: Vec::new(),
                });
            } else if let Some((done, text)) = parse_item(line) {
                if let Some(task) = tasks.last_mut() {
                    task.subtasks.push(Subtask {
                        text: text.to_string(),
                        done,
                    });
                }
            }
        }
        Self { tasks }
    }

    /// Render as Markdown.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from("# Tasks\n");
        for (i, task) in self.tasks.iter().enumerate() {
            let _ = write!(out, "\n## Task {}: {}\n", i + 1, task.title);
            for subtask in &task.subtasks {
                let mark = if subtask.done { 'x' } else { ' ' };
                let _ = writeln!(out, "- [{mark}] {}", subtask.text);
            }
        }
        out
    }

    /// Number of finished tasks.
    #[must_use]
    pub fn done_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_done()).count()
    }

    fn find(&self, reference: &TaskRef) -> Result<usize, ToolError> {
        let found = match reference {
            TaskRef::Number(n) => n.checked_sub(1).filter(|i| *i < self.tasks.len()),
            TaskRef::Title(title) => self
                .tasks
                .iter()
                .position(|t| t.title.eq_ignore_ascii_case(title.trim())),
        };
        found.ok_or_else(|| ToolError::Execution(format!("task not found: {reference}")))
    }

    fn load(path: &Path) -> Result<Self, ToolError> {
        match std::fs::read_to_string(path) {
            Ok(markdown) => Ok(Self::parse(&markdown)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, path: &Path) -> Result<(), ToolError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.render())?;
        Ok(())
    }
}

fn strip_task_number(heading: &str) -> &str {
    heading
        .strip_prefix("Task ")
        .and_then(|rest| rest.split_once(": "))
        .filter(|(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        .map_or(heading, |(_, title)| title)
        .trim()
}

fn parse_item(line: &str) -> Option<(bool, &str)> {
    let rest = line.trim_start().strip_prefix("- [")?;
    let mut chars = rest.chars();
    let done = match chars.next()? {
        ' ' => false,
        'x' | 'X' => true,
        _ => return None,
    };
    let text = chars.as_str().strip_prefix("] ")?;
    Some((done, text.trim()))
}

/// A task addressed by 1-based number or by title.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TaskRef {
    Number(usize),
    Title(String),
}

impl std::fmt::Display for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "#{n}"),
            Self::Title(title) => write!(f, "'{title}'"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
enum TaskAction {
    Create {
        title: String,
        #[serde(default)]
        subtasks: Vec<String>,
    },
    AddSubtask {
        task: TaskRef,
        subtask: String,
    },
    Complete {
        task: TaskRef,
        #[serde(default)]
        subtask: Option<usize>,
    },
    Remove {
        task: TaskRef,
    },
    List,
    Clear,
}

/// Creates and tracks the task breakdown while planning.
#[derive(Debug, Default)]
pub struct TaskManagerTool {
    lock: Arc<Mutex<()>>,
}

impl TaskManagerTool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load, modify and save the task file. Blocking; run off the async runtime.
    fn apply(
        lock: &Mutex<()>,
        path: &Path,
        action: TaskAction,
    ) -> Result<(String, TaskList), ToolError> {
        let _guard = lock.lock();
        let mut list = TaskList::load(path)?;

        let message = match action {
            TaskAction::Create { title, subtasks } => {
                let title = title.trim().to_string();
                if title.is_empty() {
                    return Err(ToolError::InvalidArguments("title is empty".to_string()));
                }
                let texts = if subtasks.is_empty() {
                    vec![title.clone()]
                } else {
                    subtasks
                };
                list.tasks.push(Task {
                    title: title.clone(),
                    subtasks: texts
                        .into_iter()
                        .map(|text| Subtask { text, done: false })
                        .collect(),
                });
                format!("Created task {}: {title}", list.tasks.len())
            }
            TaskAction::AddSubtask { task, subtask } => {
                let index = list.find(&task)?;
                list.tasks[index].subtasks.push(Subtask {
                    text: subtask,
                    done: false,
                });
                format!("Added subtask to task {}", index + 1)
            }
            TaskAction::Complete { task, subtask } => {
                let index = list.find(&task)?;
                let entry = &mut list.tasks[index];
                match subtask {
                    Some(n) => {
                        let item = n
                            .checked_sub(1)
                            .and_then(|i| entry.subtasks.get_mut(i))
                            .ok_or_else(|| {
                                ToolError::Execution(format!(
                                    "task {} has no subtask {n}",
                                    index + 1
                                ))
                            })?;
                        item.done = true;
                        format!("Completed subtask {n} of task {}", index + 1)
                    }
                    None => {
                        for item in &mut entry.subtasks {
                            item.done = true;
                        }
                        format!("Completed task {}", index + 1)
                    }
                }
            }
            TaskAction::Remove { task } => {
                let index = list.find(&task)?;
                let removed = list.tasks.remove(index);
                format!("Removed task: {}", removed.title)
            }
            TaskAction::List => {
                return Ok((format!("{} tasks", list.tasks.len()), list));
            }
            TaskAction::Clear => {
                list.tasks.clear();
                "Cleared all tasks".to_string()
            }
        };

        list.save(path)?;
        Ok((message, list))
    }
}

#[async_trait]
impl Tool for TaskManagerTool {
    fn name(&self) -> &str {
        "taskManager"
    }

    fn description(&self) -> &str {
        "Manage the task breakdown for the current plan. Actions: create (title, subtasks), \
         addSubtask (task, subtask), complete (task, optional 1-based subtask), remove (task), list, clear. \
         Tasks are addressed by 1-based number or title."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["create", "addSubtask", "complete", "remove", "list", "clear"]
                },
                "title": { "type": "string", "description": "Title for a new task" },
                "subtasks": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Steps of a new task"
                },
                "task": {
                    "type": ["integer", "string"],
                    "description": "Task number or title"
                },
                "subtask": {
                    "type": ["integer", "string"],
                    "description": "Subtask text for addSubtask, subtask number for complete"
                }
            },
            "required": ["action"]
        })
    }

    fn available_in(&self, mode: Mode) -> bool {
        mode == Mode::Plan
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let action: TaskAction = parse_args(args)?;
        let path: PathBuf = ctx.resolve(TASKS_FILE);

        tracing::info!(action = ?action, "updating tasks");

        let lock = Arc::clone(&self.lock);
        let (message, list) =
            tokio::task::spawn_blocking(move || Self::apply(&lock, &path, action))
                .await
                .map_err(|e| ToolError::Execution(e.to_string()))??;
        Ok(json!({
            "success": true,
            "message": message,
            "done": list.done_count(),
            "total": list.tasks.len(),
            "tasks": list.render(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(dir: &Path) -> ToolContext {
        ToolContext::new(dir, Mode::Plan)
    }

    #[test]
    fn markdown_round_trips() {
        let markdown = "# Tasks\n\n## Task 1: Config\n- [x] struct\n- [ ] merge\n\n## Task 2: CLI\n- [ ] flags\n";
        let list = TaskList::parse(markdown);

        assert_eq!(list.tasks.len(), 2);
        assert_eq!(list.tasks[0].title, "Config");
        assert!(list.tasks[0].subtasks[0].done);
        assert!(!list.tasks[0].subtasks[1].done);
        assert_eq!(list.render(), markdown);
    }

    #[test]
    fn parse_tolerates_hand_edits() {
        let list = TaskList::parse("## Release\nnotes\n- [X] tag\n* not an item\n- [?] odd\n");
        assert_eq!(list.tasks.len(), 1);
        assert_eq!(list.tasks[0].title, "Release");
        assert_eq!(list.tasks[0].subtasks.len(), 1);
        assert!(list.tasks[0].is_done());
    }

    #[tokio::test]
    async fn create_complete_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let tool = TaskManagerTool::new();

        tool.invoke(
            json!({"action": "create", "title": "Config", "subtasks": ["struct", "merge"]}),
            &ctx(dir.path()),
        )
        .await
        .unwrap();
        tool.invoke(
            json!({"action": "complete", "task": 1, "subtask": 1}),
            &ctx(dir.path()),
        )
        .await
        .unwrap();
        let result = tool
            .invoke(
                json!({"action": "addSubtask", "task": "config", "subtask": "test"}),
                &ctx(dir.path()),
            )
            .await
            .unwrap();

        assert_eq!(result["total"], 1);
        assert_eq!(result["done"], 0);

        let saved = std::fs::read_to_string(dir.path().join(TASKS_FILE)).unwrap();
        assert!(saved.contains("## Task 1: Config"));
        assert!(saved.contains("- [x] struct"));
        assert!(saved.contains("- [ ] merge"));
        assert!(saved.contains("- [ ] test"));
    }

    #[tokio::test]
    async fn complete_whole_task_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let tool = TaskManagerTool::new();

        tool.invoke(json!({"action": "create", "title": "Ship"}), &ctx(dir.path()))
            .await
            .unwrap();
        let done = tool
            .invoke(json!({"action": "complete", "task": "Ship"}), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(done["done"], 1);

        let cleared = tool
            .invoke(json!({"action": "clear"}), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(cleared["total"], 0);
    }

    #[tokio::test]
    async fn unknown_task_and_action_fail() {
        let dir = tempfile::tempdir().unwrap();
        let tool = TaskManagerTool::new();

        let missing = tool
            .invoke(json!({"action": "remove", "task": 3}), &ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(missing.to_string().contains("task not found"));

        let bad = tool
            .invoke(json!({"action": "explode"}), &ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(bad, ToolError::InvalidArguments(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_creates_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        let tool = TaskManagerTool::new();
        let ctx = ctx(dir.path());

        let creates = (0..6).map(|i| {
            tool.invoke(
                json!({"action": "create", "title": format!("Task {i}")}),
                &ctx,
            )
        });
        for result in futures::future::join_all(creates).await {
            result.unwrap();
        }

        let saved = std::fs::read_to_string(dir.path().join(TASKS_FILE)).unwrap();
        assert_eq!(TaskList::parse(&saved).tasks.len(), 6);
    }

    #[tokio::test]
    async fn list_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let tool = TaskManagerTool::new();
        let result = tool
            .invoke(json!({"action": "list"}), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(result["total"], 0);
        assert!(!dir.path().join(TASKS_FILE).exists());
    }
}

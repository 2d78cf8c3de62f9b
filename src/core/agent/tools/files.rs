use std::fmt::Write as _;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use similar::TextDiff;

use super::{Tool, ToolContext, parse_args};
use crate::core::agent::error::ToolError;

/// Maximum size of a file returned by `readFile` (100KB).
const MAX_FILE_SIZE: u64 = 100 * 1024;

/// Maximum entries listed by `projectStructure`.
const MAX_ENTRIES: usize = 1000;

const DEFAULT_DEPTH: usize = 3;

#[derive(Debug, Deserialize)]
struct PathArgs {
    path: String,
}

/// Reads a UTF-8 text file.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "readFile"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the project root"
                }
            },
            "required": ["path"]
        })
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let PathArgs { path } = parse_args(args)?;
        let resolved = ctx.resolve(&path);

        tracing::info!(path = %resolved.display(), "reading file");

        let metadata = tokio::fs::metadata(&resolved)
            .await
            .map_err(|e| ToolError::Execution(format!("cannot read {path}: {e}")))?;
        if !metadata.is_file() {
            return Err(ToolError::Execution(format!("not a file: {path}")));
        }
        if metadata.len() > MAX_FILE_SIZE {
            return Err(ToolError::Execution(format!(
                "file too large: {path} ({} bytes, max {MAX_FILE_SIZE} bytes)",
                metadata.len()
            )));
        }

        let content = tokio::fs::read_to_string(&resolved).await?;
        Ok(json!({ "path": path, "content": content }))
    }
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

/// Writes a file and returns a diff against the previous content.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "writeFile"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed. Returns a unified diff of the change."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "Full new content of the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let WriteArgs { path, content } = parse_args(args)?;
        let resolved = ctx.resolve(&path);

        let previous = match tokio::fs::read_to_string(&resolved).await {
            Ok(previous) => Some(previous),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        tracing::info!(path = %resolved.display(), bytes = content.len(), "writing file");

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&resolved, &content).await?;

        let diff = generate_diff(previous.as_deref().unwrap_or(""), &content, &path);
        Ok(json!({
            "path": path,
            "created": previous.is_none(),
            "bytesWritten": content.len(),
            "diff": diff,
        }))
    }
}

fn generate_diff(old: &str, new: &str, path: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

#[derive(Debug, Default, Deserialize)]
struct StructureArgs {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    max_depth: Option<usize>,
}

/// Lists the project tree, respecting `.gitignore`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectStructureTool;

#[async_trait]
impl Tool for ProjectStructureTool {
    fn name(&self) -> &str {
        "projectStructure"
    }

    fn description(&self) -> &str {
        "Show the directory tree of the project, skipping files ignored by git."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (default: project root)"
                },
                "max_depth": {
                    "type": "integer",
                    "description": "How many levels to descend (default: 3)"
                }
            }
        })
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let args: StructureArgs = parse_args(args)?;
        let root = ctx.resolve(args.path.as_deref().unwrap_or("."));
        let depth = args.max_depth.unwrap_or(DEFAULT_DEPTH).max(1);

        if !root.is_dir() {
            return Err(ToolError::Execution(format!(
                "not a directory: {}",
                root.display()
            )));
        }

        tracing::info!(path = %root.display(), depth, "listing project structure");

        let walk_root = root.clone();
        let (tree, truncated) = tokio::task::spawn_blocking(move || render_tree(&walk_root, depth))
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        Ok(json!({
            "root": root.display().to_string(),
            "tree": tree,
            "truncated": truncated,
        }))
    }
}

fn render_tree(root: &Path, depth: usize) -> (String, bool) {
    let walker = ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_exclude(true)
        .require_git(false)
        .max_depth(Some(depth))
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut tree = String::new();
    let mut count = 0;
    for entry in walker.flatten() {
        if entry.depth() == 0 {
            continue;
        }
        if count >= MAX_ENTRIES {
            return (tree, true);
        }
        count += 1;

        let name = entry.file_name().to_string_lossy();
        let indent = "  ".repeat(entry.depth() - 1);
        let suffix = if entry.file_type().is_some_and(|t| t.is_dir()) {
            "/"
        } else {
            ""
        };
        let _ = writeln!(tree, "{indent}{name}{suffix}");
    }

    (tree, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::mode::Mode;

    fn ctx(dir: &Path) -> ToolContext {
        ToolContext::new(dir, Mode::Execute)
    }

    #[tokio::test]
    async fn read_file_returns_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "Hello, World!").unwrap();

        let result = ReadFileTool
            .invoke(json!({"path": "a.txt"}), &ctx(dir.path()))
            .await
            .unwrap();

        assert_eq!(result["content"], "Hello, World!");
    }

    #[tokio::test]
    async fn read_file_rejects_missing_and_large_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = ReadFileTool
            .invoke(json!({"path": "nope.txt"}), &ctx(dir.path()))
            .await;
        assert!(missing.is_err());

        let size = usize::try_from(MAX_FILE_SIZE).unwrap() + 1;
        std::fs::write(dir.path().join("big.txt"), "x".repeat(size)).unwrap();
        let err = ReadFileTool
            .invoke(json!({"path": "big.txt"}), &ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("file too large"));
    }

    #[tokio::test]
    async fn read_file_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReadFileTool
            .invoke(json!({"path": "."}), &ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a file"));
    }

    #[tokio::test]
    async fn write_file_creates_parents_and_diffs() {
        let dir = tempfile::tempdir().unwrap();

        let created = WriteFileTool
            .invoke(
                json!({"path": "src/lib.rs", "content": "one\ntwo\n"}),
                &ctx(dir.path()),
            )
            .await
            .unwrap();
        assert_eq!(created["created"], true);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/lib.rs")).unwrap(),
            "one\ntwo\n"
        );

        let updated = WriteFileTool
            .invoke(
                json!({"path": "src/lib.rs", "content": "one\nthree\n"}),
                &ctx(dir.path()),
            )
            .await
            .unwrap();
        let diff = updated["diff"].as_str().unwrap();
        assert_eq!(updated["created"], false);
        assert!(diff.contains("-two"));
        assert!(diff.contains("+three"));
        assert!(diff.contains("a/src/lib.rs"));
    }

    #[tokio::test]
    async fn write_file_requires_content() {
        let dir = tempfile::tempdir().unwrap();
        let err = WriteFileTool
            .invoke(json!({"path": "x"}), &ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn project_structure_respects_gitignore_and_depth() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/deep/deeper")).unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join(".gitignore"), "target/\n").unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/deep/deeper/x.rs"), "").unwrap();
        std::fs::write(dir.path().join("target/out"), "").unwrap();

        let result = ProjectStructureTool
            .invoke(json!({"max_depth": 2}), &ctx(dir.path()))
            .await
            .unwrap();
        let tree = result["tree"].as_str().unwrap();

        assert!(tree.contains("Cargo.toml"));
        assert!(tree.contains("src/"));
        assert!(tree.contains("  main.rs"));
        assert!(tree.contains("  deep/"));
        assert!(!tree.contains("deeper"));
        assert!(!tree.contains("target"));
        assert_eq!(result["truncated"], false);
    }

    #[tokio::test]
    async fn project_structure_accepts_empty_arguments() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();
        let result = ProjectStructureTool
            .invoke(json!({}), &ctx(dir.path()))
            .await
            .unwrap();
        assert!(result["tree"].as_str().unwrap().contains("README.md"));
    }
}

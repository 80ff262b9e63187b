use std::path::{Path, PathBuf};
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::sandbox::SandboxExecutor;
use crate::tool::{Tool, ToolCall, ToolFuture, ToolResult, deserialize_params};

const MAX_READ_LINES: usize = 2000;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadFileParams {
    /// Path to the file to read.
    pub path: String,
    /// Line number to start reading from (1-based).
    pub offset: Option<usize>,
    /// Maximum number of lines to return. Default 2000.
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteFileParams {
    /// Path to the file to write. Parent directories are created as needed.
    pub path: String,
    /// Content to write. Replaces the file if it already exists.
    pub content: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListDirectoryParams {
    /// Path to the directory to list.
    pub path: String,
}

fn check_read(sandbox: &SandboxExecutor, path: &Path) -> Result<(), String> {
    sandbox
        .path_restrictions()
        .check_path(path)
        .map_err(|e| e.to_string())
}

fn check_write(sandbox: &SandboxExecutor, path: &Path) -> Result<(), String> {
    check_read(sandbox, path)?;
    if sandbox.path_restrictions().is_read_only(path) {
        return Err(format!("access denied: {} is read-only", path.display()));
    }
    Ok(())
}

/// Reads a file with line numbers, supporting offset and limit for large files.
pub struct ReadFileTool {
    sandbox: Arc<SandboxExecutor>,
}

impl ReadFileTool {
    #[must_use]
    pub fn new(sandbox: Arc<SandboxExecutor>) -> Self {
        Self { sandbox }
    }
}

impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the filesystem. Returns the content with line numbers. \
         Use offset and limit to read a slice of a large file."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(ReadFileParams)).unwrap_or_default()
    }

    fn execute<'a>(&'a self, call: &'a ToolCall) -> ToolFuture<'a> {
        Box::pin(async move {
            let params: ReadFileParams = match deserialize_params(&call.input) {
                Ok(p) => p,
                Err(e) => return ToolResult::error(call.id.clone(), e.to_string()),
            };
            let path = PathBuf::from(&params.path);
            if let Err(reason) = check_read(&self.sandbox, &path) {
                return ToolResult::error(call.id.clone(), reason);
            }

            let content = match tokio::fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(e) => {
                    return ToolResult::error(
                        call.id.clone(),
                        format!("failed to read {}: {e}", path.display()),
                    );
                }
            };

            let offset = params.offset.unwrap_or(1).max(1);
            let limit = params.limit.unwrap_or(MAX_READ_LINES);
            let mut out = String::new();
            for (idx, line) in content.lines().enumerate().skip(offset - 1).take(limit) {
                out.push_str(&format!("{:>6}\t{line}\n", idx + 1));
            }
            if out.is_empty() && !content.is_empty() {
                return ToolResult::error(
                    call.id.clone(),
                    format!("offset {offset} is past the end of the file"),
                );
            }
            ToolResult::ok(call.id.clone(), out)
        })
    }
}

/// Writes a file, creating parent directories as needed. Dangerous because it
/// can overwrite existing content.
pub struct WriteFileTool {
    sandbox: Arc<SandboxExecutor>,
}

impl WriteFileTool {
    #[must_use]
    pub fn new(sandbox: Arc<SandboxExecutor>) -> Self {
        Self { sandbox }
    }
}

impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, replacing it if it exists. Parent directories \
         are created automatically."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(WriteFileParams)).unwrap_or_default()
    }

    fn is_dangerous(&self) -> bool {
        true
    }

    fn execute<'a>(&'a self, call: &'a ToolCall) -> ToolFuture<'a> {
        Box::pin(async move {
            let params: WriteFileParams = match deserialize_params(&call.input) {
                Ok(p) => p,
                Err(e) => return ToolResult::error(call.id.clone(), e.to_string()),
            };
            let path = PathBuf::from(&params.path);
            if let Err(reason) = check_write(&self.sandbox, &path) {
                return ToolResult::error(call.id.clone(), reason);
            }

            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = tokio::fs::create_dir_all(parent).await
            {
                return ToolResult::error(
                    call.id.clone(),
                    format!("failed to create {}: {e}", parent.display()),
                );
            }

            match tokio::fs::write(&path, &params.content).await {
                Ok(()) => ToolResult::ok(
                    call.id.clone(),
                    format!("wrote {} bytes to {}", params.content.len(), path.display()),
                ),
                Err(e) => ToolResult::error(
                    call.id.clone(),
                    format!("failed to write {}: {e}", path.display()),
                ),
            }
        })
    }
}

/// Lists a directory, sorted by name, with a trailing slash on subdirectories.
pub struct ListDirectoryTool {
    sandbox: Arc<SandboxExecutor>,
}

impl ListDirectoryTool {
    #[must_use]
    pub fn new(sandbox: Arc<SandboxExecutor>) -> Self {
        Self { sandbox }
    }
}

impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the entries of a directory, sorted by name. Directories are \
         suffixed with a slash."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(ListDirectoryParams)).unwrap_or_default()
    }

    fn execute<'a>(&'a self, call: &'a ToolCall) -> ToolFuture<'a> {
        Box::pin(async move {
            let params: ListDirectoryParams = match deserialize_params(&call.input) {
                Ok(p) => p,
                Err(e) => return ToolResult::error(call.id.clone(), e.to_string()),
            };
            let path = PathBuf::from(&params.path);
            if let Err(reason) = check_read(&self.sandbox, &path) {
                return ToolResult::error(call.id.clone(), reason);
            }

            let mut reader = match tokio::fs::read_dir(&path).await {
                Ok(r) => r,
                Err(e) => {
                    return ToolResult::error(
                        call.id.clone(),
                        format!("failed to list {}: {e}", path.display()),
                    );
                }
            };

            let mut entries = Vec::new();
            while let Ok(Some(entry)) = reader.next_entry().await {
                let mut name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                    name.push('/');
                }
                entries.push(name);
            }
            entries.sort();
            ToolResult::ok(call.id.clone(), entries.join("\n"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{CommandFilter, FilterMode};
    use crate::paths::PathRestrictions;

    fn sandbox_with(no_access: &[String], read_only: &[String]) -> Arc<SandboxExecutor> {
        Arc::new(SandboxExecutor::new(
            CommandFilter::new(&[], &[], FilterMode::Blacklist),
            PathRestrictions::new(no_access, read_only),
        ))
    }

    fn call(name: &str, input: serde_json::Value) -> ToolCall {
        let serde_json::Value::Object(input) = input else {
            panic!("input must be an object");
        };
        ToolCall {
            id: "toolu_test".into(),
            name: name.into(),
            input,
        }
    }

    #[tokio::test]
    async fn read_returns_numbered_lines() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "alpha\nbeta\ngamma\n").unwrap();

        let tool = ReadFileTool::new(sandbox_with(&["/nonexistent".into()], &[]));
        let result = tool
            .execute(&call(
                "read_file",
                serde_json::json!({"path": file.to_str().unwrap()}),
            ))
            .await;
        assert!(!result.is_error);
        assert!(result.output.contains("1\talpha"));
        assert!(result.output.contains("3\tgamma"));
    }

    #[tokio::test]
    async fn read_with_offset_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("long.txt");
        let content: String = (1..=10).map(|n| format!("line {n}\n")).collect();
        std::fs::write(&file, content).unwrap();

        let tool = ReadFileTool::new(sandbox_with(&["/nonexistent".into()], &[]));
        let result = tool
            .execute(&call(
                "read_file",
                serde_json::json!({"path": file.to_str().unwrap(), "offset": 4, "limit": 2}),
            ))
            .await;
        assert!(!result.is_error);
        assert!(result.output.contains("line 4"));
        assert!(result.output.contains("line 5"));
        assert!(!result.output.contains("line 6"));
    }

    #[tokio::test]
    async fn read_blocked_under_no_access() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("secret.txt");
        std::fs::write(&file, "hidden").unwrap();

        let tool = ReadFileTool::new(sandbox_with(
            &[dir.path().to_string_lossy().into_owned()],
            &[],
        ));
        let result = tool
            .execute(&call(
                "read_file",
                serde_json::json!({"path": file.to_str().unwrap()}),
            ))
            .await;
        assert!(result.is_error);
        assert!(result.error.unwrap().contains("access denied"));
    }

    #[tokio::test]
    async fn write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a/b/out.txt");

        let tool = WriteFileTool::new(sandbox_with(&["/nonexistent".into()], &[]));
        let result = tool
            .execute(&call(
                "write_file",
                serde_json::json!({"path": file.to_str().unwrap(), "content": "data"}),
            ))
            .await;
        assert!(!result.is_error);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "data");
    }

    #[tokio::test]
    async fn write_blocked_in_read_only_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("frozen.txt");

        let tool = WriteFileTool::new(sandbox_with(
            &["/nonexistent".into()],
            &[dir.path().to_string_lossy().into_owned()],
        ));
        let result = tool
            .execute(&call(
                "write_file",
                serde_json::json!({"path": file.to_str().unwrap(), "content": "nope"}),
            ))
            .await;
        assert!(result.is_error);
        assert!(result.error.unwrap().contains("read-only"));
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn list_sorted_with_dir_markers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();

        let tool = ListDirectoryTool::new(sandbox_with(&["/nonexistent".into()], &[]));
        let result = tool
            .execute(&call(
                "list_directory",
                serde_json::json!({"path": dir.path().to_str().unwrap()}),
            ))
            .await;
        assert!(!result.is_error);
        assert_eq!(result.output, "a/\nb.txt");
    }

    #[test]
    fn danger_flags() {
        let sandbox = sandbox_with(&[], &[]);
        assert!(!ReadFileTool::new(sandbox.clone()).is_dangerous());
        assert!(WriteFileTool::new(sandbox.clone()).is_dangerous());
        assert!(!ListDirectoryTool::new(sandbox).is_dangerous());
    }
}

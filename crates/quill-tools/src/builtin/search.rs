use std::path::PathBuf;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::sandbox::SandboxExecutor;
use crate::tool::{Tool, ToolCall, ToolFuture, ToolResult, deserialize_params};

const MAX_RESULTS: usize = 500;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchFilesParams {
    /// Glob pattern to match, e.g. `**/*.rs` or `src/*.toml`.
    pub pattern: String,
    /// Directory to search under. Defaults to the current directory.
    pub path: Option<String>,
}

/// Finds files by glob pattern under a root directory. Matches inside
/// restricted paths are dropped from the results.
pub struct SearchFilesTool {
    sandbox: Arc<SandboxExecutor>,
}

impl SearchFilesTool {
    #[must_use]
    pub fn new(sandbox: Arc<SandboxExecutor>) -> Self {
        Self { sandbox }
    }
}

impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern under a directory. Returns one \
         path per line, sorted. Supports `*`, `?`, and `**` wildcards."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(SearchFilesParams)).unwrap_or_default()
    }

    fn execute<'a>(&'a self, call: &'a ToolCall) -> ToolFuture<'a> {
        Box::pin(async move {
            let params: SearchFilesParams = match deserialize_params(&call.input) {
                Ok(p) => p,
                Err(e) => return ToolResult::error(call.id.clone(), e.to_string()),
            };

            let root = PathBuf::from(params.path.as_deref().unwrap_or("."));
            if let Err(e) = self.sandbox.path_restrictions().check_path(&root) {
                return ToolResult::error(call.id.clone(), e.to_string());
            }

            let full_pattern = root.join(&params.pattern);
            let Some(full_pattern) = full_pattern.to_str() else {
                return ToolResult::error(call.id.clone(), "pattern is not valid UTF-8");
            };
            let paths = match glob::glob(full_pattern) {
                Ok(paths) => paths,
                Err(e) => {
                    return ToolResult::error(
                        call.id.clone(),
                        format!("invalid glob pattern: {e}"),
                    );
                }
            };

            let mut matches: Vec<String> = paths
                .filter_map(Result::ok)
                .filter(|p| self.sandbox.path_restrictions().check_path(p).is_ok())
                .map(|p| p.display().to_string())
                .take(MAX_RESULTS)
                .collect();
            matches.sort();

            if matches.is_empty() {
                return ToolResult::ok(call.id.clone(), "no files matched");
            }
            ToolResult::ok(call.id.clone(), matches.join("\n"))
        })
    }
}

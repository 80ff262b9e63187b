use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::sandbox::SandboxExecutor;
use crate::tool::{Tool, ToolCall, ToolFuture, ToolResult, deserialize_params};

const MAX_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BashParams {
    /// The bash command to execute. Can be a single command or a pipeline.
    pub command: String,
    /// Working directory for the command. Defaults to the current directory.
    pub working_dir: Option<String>,
    /// Timeout in seconds. Default 30, capped at 300.
    pub timeout: Option<u64>,
}

/// Shell execution through the security sandbox. All commands are subject to
/// command filtering, path restrictions, and timeout limits.
pub struct BashTool {
    sandbox: Arc<SandboxExecutor>,
}

impl BashTool {
    #[must_use]
    pub fn new(sandbox: Arc<SandboxExecutor>) -> Self {
        Self { sandbox }
    }
}

impl Tool for BashTool {
    fn name(&self) -> &str {
        "execute_bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command in a sandboxed environment. Returns stdout, \
         stderr, and the exit code. Commands are subject to security filtering \
         and path restrictions. Avoid long-running commands (default timeout 30s)."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(BashParams)).unwrap_or_default()
    }

    fn is_dangerous(&self) -> bool {
        true
    }

    fn execute<'a>(&'a self, call: &'a ToolCall) -> ToolFuture<'a> {
        Box::pin(async move {
            let params: BashParams = match deserialize_params(&call.input) {
                Ok(p) => p,
                Err(e) => return ToolResult::error(call.id.clone(), e.to_string()),
            };

            let timeout = Duration::from_secs(
                params.timeout.unwrap_or(30).min(MAX_TIMEOUT_SECS),
            );
            let cwd = params.working_dir.map(PathBuf::from);

            let result = self
                .sandbox
                .execute(&params.command, cwd.as_ref(), None, Some(timeout))
                .await;

            if result.blocked {
                let reason = result
                    .blocked_reason
                    .unwrap_or_else(|| "blocked by policy".into());
                return ToolResult::error(call.id.clone(), format!("command blocked: {reason}"));
            }

            let mut output = result.stdout;
            if !result.stderr.is_empty() {
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str("[stderr] ");
                output.push_str(&result.stderr);
            }

            if result.success {
                ToolResult::ok(call.id.clone(), output).with_exit_code(result.exit_code)
            } else {
                ToolResult {
                    tool_call_id: call.id.clone(),
                    output,
                    error: Some(match result.exit_code {
                        Some(code) => format!("command exited with code {code}"),
                        None => result.stderr.clone(),
                    }),
                    exit_code: result.exit_code,
                    is_error: true,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{CommandFilter, FilterMode};
    use crate::paths::PathRestrictions;

    fn bash_tool() -> BashTool {
        let sandbox = SandboxExecutor::new(
            CommandFilter::new(&[], &[], FilterMode::Blacklist),
            PathRestrictions::new(&["/nonexistent-restricted".to_owned()], &[]),
        );
        BashTool::new(Arc::new(sandbox))
    }

    fn call(id: &str, input: serde_json::Value) -> ToolCall {
        let serde_json::Value::Object(input) = input else {
            panic!("input must be an object");
        };
        ToolCall {
            id: id.into(),
            name: "execute_bash".into(),
            input,
        }
    }

    #[tokio::test]
    async fn echoes_output() {
        let tool = bash_tool();
        let result = tool
            .execute(&call("toolu_1", serde_json::json!({"command": "echo hi"})))
            .await;
        assert!(!result.is_error);
        assert_eq!(result.tool_call_id, "toolu_1");
        assert_eq!(result.output.trim(), "hi");
        assert_eq!(result.exit_code, Some(0));
    }

    #[tokio::test]
    async fn nonzero_exit_is_error_with_code() {
        let tool = bash_tool();
        let result = tool
            .execute(&call("toolu_2", serde_json::json!({"command": "exit 7"})))
            .await;
        assert!(result.is_error);
        assert_eq!(result.exit_code, Some(7));
        assert!(result.error.unwrap().contains('7'));
    }

    #[tokio::test]
    async fn blocked_command_reported_as_error() {
        let sandbox = SandboxExecutor::new(
            CommandFilter::new(&["ls".to_owned()], &[], FilterMode::Whitelist),
            PathRestrictions::default(),
        );
        let tool = BashTool::new(Arc::new(sandbox));
        let result = tool
            .execute(&call("toolu_3", serde_json::json!({"command": "echo leaked"})))
            .await;
        assert!(result.is_error);
        assert!(result.error.unwrap().contains("command blocked"));
        assert!(result.output.is_empty());
    }

    #[tokio::test]
    async fn missing_command_param_is_error() {
        let tool = bash_tool();
        let result = tool.execute(&call("toolu_4", serde_json::json!({}))).await;
        assert!(result.is_error);
        assert!(result.error.unwrap().contains("invalid tool parameters"));
    }

    #[tokio::test]
    async fn stderr_folded_into_output() {
        let tool = bash_tool();
        let result = tool
            .execute(&call(
                "toolu_5",
                serde_json::json!({"command": "echo out; echo err >&2"}),
            ))
            .await;
        assert!(!result.is_error);
        assert!(result.output.contains("out"));
        assert!(result.output.contains("[stderr] err"));
    }

    #[test]
    fn schema_lists_command_required() {
        let tool = bash_tool();
        let schema = tool.input_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "command"));
        assert!(schema["properties"]["timeout"].is_object());
    }

    #[test]
    fn marked_dangerous() {
        assert!(bash_tool().is_dangerous());
    }
}

use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};

/// A structured tool invocation request parsed from a model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    /// Opaque call id assigned by the model; echoed back on the result.
    pub id: String,
    pub name: String,
    pub input: Map<String, Value>,
}

/// Outcome of executing a single `ToolCall`. Created exactly once per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub output: String,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub is_error: bool,
}

impl ToolResult {
    #[must_use]
    pub fn ok(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            output: output.into(),
            error: None,
            exit_code: None,
            is_error: false,
        }
    }

    #[must_use]
    pub fn error(tool_call_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            output: String::new(),
            error: Some(error.into()),
            exit_code: None,
            is_error: true,
        }
    }

    #[must_use]
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid tool parameters: {message}")]
    InvalidParams { message: String },

    #[error("execution failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Deserialize tool call input into a typed params struct.
///
/// # Errors
///
/// Returns `ToolError::InvalidParams` when deserialization fails.
pub fn deserialize_params<T: serde::de::DeserializeOwned>(
    input: &Map<String, Value>,
) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(input.clone())).map_err(|e| ToolError::InvalidParams {
        message: e.to_string(),
    })
}

pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = ToolResult> + Send + 'a>>;

/// A capability the agent can invoke.
///
/// Tools never fail at the trait level: execution problems are reported as a
/// `ToolResult` with `is_error` set, so the loop can feed them back to the
/// model instead of aborting.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema describing the tool's input object.
    fn input_schema(&self) -> Value;

    /// Whether the tool can mutate system state. Dangerous tools are gated
    /// behind manual approval.
    fn is_dangerous(&self) -> bool {
        false
    }

    fn execute<'a>(&'a self, call: &'a ToolCall) -> ToolFuture<'a>;
}

/// Name + schema descriptor handed to the provider layer.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolSpec {
    #[must_use]
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_owned(),
            description: tool.description().to_owned(),
            input_schema: tool.input_schema(),
        }
    }
}

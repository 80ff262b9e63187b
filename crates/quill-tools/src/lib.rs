//! Sandboxed tool execution: command filtering, path restrictions, and the
//! tool registry with the built-in tool set.

pub mod builtin;
pub mod filter;
pub mod paths;
pub mod registry;
pub mod sandbox;
pub mod tool;

pub use builtin::{
    BashTool, HttpRequestTool, ListDirectoryTool, ReadFileTool, SearchFilesTool, WriteFileTool,
};
pub use filter::{CommandCheck, CommandFilter, FilterMode};
pub use paths::{PathRestrictions, PathViolation};
pub use registry::{RegistryError, ToolRegistry};
pub use sandbox::{DEFAULT_TIMEOUT_SECS, ExecutionResult, SandboxExecutor};
pub use tool::{Tool, ToolCall, ToolError, ToolFuture, ToolResult, ToolSpec, deserialize_params};

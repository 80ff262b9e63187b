//! Built-in tools shipped with the agent.

pub mod bash;
pub mod file;
pub mod http;
pub mod search;

pub use bash::BashTool;
pub use file::{ListDirectoryTool, ReadFileTool, WriteFileTool};
pub use http::HttpRequestTool;
pub use search::SearchFilesTool;

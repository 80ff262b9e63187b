//! LLM provider abstraction: Claude and OpenAI-compatible backends behind a
//! fallback chain.

pub mod any;
pub mod claude;
pub mod compatible;
pub mod error;
pub mod fallback;
pub mod manager;
#[cfg(feature = "mock")]
pub mod mock;
pub mod provider;
mod retry;

pub use any::AnyProvider;
pub use claude::ClaudeProvider;
pub use compatible::CompatibleProvider;
pub use error::{FailureKind, LlmError};
pub use fallback::{FallbackAttempt, FallbackHandler};
pub use manager::{ManagedCompletion, ProviderManager};
pub use provider::{
    ChatResponse, Completion, LlmProvider, Message, MessagePart, Role, TokenUsage, ToolDefinition,
    ToolUseRequest,
};

//! Agent orchestration: the iterate-until-answer loop, tool call parsing,
//! the approval gate, context tracking, and cost accounting.

pub mod agent;
pub mod config;
pub mod context;
pub mod cost;
pub mod event;
pub mod parser;

pub use agent::{AgentLoop, AgentOutcome, ApprovalFn, StopReason};
pub use config::{
    AgentConfig, ApprovalMode, Config, ConfigError, ContextConfig, CostConfig, ProviderConfig,
    ProviderKind, SecurityConfig, ToolDecision,
};
pub use context::{
    ContextTracker, ContextUsage, DEFAULT_CONTEXT_WINDOW, context_window_for, estimate_tokens,
};
pub use cost::{BudgetExhausted, CostTracker, ModelPricing};
pub use event::{AgentEvent, EventKind, EventRx, EventTx, channel, emit};
pub use parser::{has_tool_calls, parse_tool_calls};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Everything the loop can tell an observer about its progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    IterationStart,
    IterationEnd,
    LlmRequest,
    LlmResponse,
    ToolCall,
    ToolResult,
    ToolDenied,
    ApprovalRequired,
    ToolApproved,
    ProviderFallback,
    ContextWarning,
    Error,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub kind: EventKind,
    pub iteration: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
}

fn now_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl AgentEvent {
    #[must_use]
    pub fn new(kind: EventKind, iteration: usize) -> Self {
        Self {
            kind,
            iteration,
            tool_name: None,
            tool_call_id: None,
            message: None,
            data: None,
            timestamp: now_secs(),
        }
    }

    #[must_use]
    pub fn with_tool(mut self, name: impl Into<String>, call_id: impl Into<String>) -> Self {
        self.tool_name = Some(name.into());
        self.tool_call_id = Some(call_id.into());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

pub type EventTx = mpsc::UnboundedSender<AgentEvent>;
pub type EventRx = mpsc::UnboundedReceiver<AgentEvent>;

#[must_use]
pub fn channel() -> (EventTx, EventRx) {
    mpsc::unbounded_channel()
}

/// Send an event if anyone is listening. A dropped receiver never stops the
/// loop.
pub fn emit(tx: Option<&EventTx>, event: AgentEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(event);
    }
}

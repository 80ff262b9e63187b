//! Test-only mock LLM provider.

use std::sync::{Arc, Mutex};

use crate::error::LlmError;
use crate::provider::{
    ChatResponse, Completion, LlmProvider, Message, TokenUsage, ToolDefinition, ToolUseRequest,
};

/// One scripted turn. `Fail` produces the matching error so fallback paths
/// can be exercised without a network.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    ToolUse(Vec<ToolUseRequest>),
    RateLimited,
    AuthError,
    ServerError(u16),
    Timeout,
}

impl ScriptedReply {
    fn into_result(self) -> Result<ChatResponse, LlmError> {
        match self {
            Self::Text(text) => Ok(ChatResponse::Text(text)),
            Self::ToolUse(tool_calls) => Ok(ChatResponse::ToolUse {
                text: None,
                tool_calls,
            }),
            Self::RateLimited => Err(LlmError::RateLimited),
            Self::AuthError => Err(LlmError::Auth { provider: "mock" }),
            Self::ServerError(status) => Err(LlmError::Server { status }),
            Self::Timeout => Err(LlmError::Timeout),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockProvider {
    replies: Arc<Mutex<Vec<ScriptedReply>>>,
    pub default_response: String,
    pub usage: Option<TokenUsage>,
    /// Milliseconds to sleep before returning a response.
    pub delay_ms: u64,
    /// Records every request's message count, for assertions.
    pub calls: Arc<Mutex<Vec<usize>>>,
    /// Records every request's full message list, for ordering assertions.
    pub requests: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            replies: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock response".into(),
            usage: Some(TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            }),
            delay_ms: 0,
            calls: Arc::new(Mutex::new(Vec::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_replies(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self::with_replies(responses.into_iter().map(ScriptedReply::Text).collect())
    }

    #[must_use]
    pub fn failing(reply: ScriptedReply) -> Self {
        Self::with_replies(vec![reply])
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl LlmProvider for MockProvider {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn model(&self) -> &str {
        "mock-model"
    }

    fn context_window(&self) -> Option<usize> {
        Some(8192)
    }

    async fn chat_with_tools(
        &self,
        messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<Completion, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.len());
        }
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        let reply = {
            let mut replies = self.replies.lock().map_err(|_| {
                LlmError::Other("mock replies lock poisoned".into())
            })?;
            if replies.is_empty() {
                ScriptedReply::Text(self.default_response.clone())
            } else {
                replies.remove(0)
            }
        };
        Ok(Completion {
            response: reply.into_result()?,
            usage: self.usage,
        })
    }
}

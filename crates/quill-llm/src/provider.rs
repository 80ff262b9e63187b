use serde::{Deserialize, Serialize};

use crate::error::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A structured piece of a conversation turn. Plain text turns carry a single
/// `Text` part; tool round-trips carry `ToolUse` on the assistant side and
/// `ToolResult` on the user side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<MessagePart>,
}

impl Message {
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            parts: vec![MessagePart::Text { text: text.into() }],
        }
    }

    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![MessagePart::Text { text: text.into() }],
        }
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            parts: vec![MessagePart::Text { text: text.into() }],
        }
    }

    /// Assistant turn replaying the model's tool calls, as required by both
    /// wire formats before the matching results can be sent.
    #[must_use]
    pub fn assistant_tool_use(text: Option<String>, calls: &[ToolUseRequest]) -> Self {
        let mut parts = Vec::new();
        if let Some(text) = text
            && !text.is_empty()
        {
            parts.push(MessagePart::Text { text });
        }
        parts.extend(calls.iter().map(|c| MessagePart::ToolUse {
            id: c.id.clone(),
            name: c.name.clone(),
            input: c.input.clone(),
        }));
        Self {
            role: Role::Assistant,
            parts,
        }
    }

    /// User turn carrying tool results back to the model.
    #[must_use]
    pub fn tool_results(results: Vec<MessagePart>) -> Self {
        Self {
            role: Role::User,
            parts: results,
        }
    }

    /// Concatenated text content, ignoring tool parts.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Rough token estimate for this turn, used for context accounting.
    #[must_use]
    pub fn estimated_chars(&self) -> usize {
        self.parts
            .iter()
            .map(|p| match p {
                MessagePart::Text { text } => text.len(),
                MessagePart::ToolUse { name, input, .. } => name.len() + input.to_string().len(),
                MessagePart::ToolResult { content, .. } => content.len(),
            })
            .sum()
    }
}

/// Tool made available to the model, in provider-neutral form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseRequest {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// What the model answered: either final text, or a request to run tools
/// (possibly with accompanying text).
#[derive(Debug, Clone, PartialEq)]
pub enum ChatResponse {
    Text(String),
    ToolUse {
        text: Option<String>,
        tool_calls: Vec<ToolUseRequest>,
    },
}

impl ChatResponse {
    #[must_use]
    pub fn tool_calls(&self) -> &[ToolUseRequest] {
        match self {
            Self::Text(_) => &[],
            Self::ToolUse { tool_calls, .. } => tool_calls,
        }
    }

    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::ToolUse { text, .. } => text.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A provider response with its token accounting, when the provider reports it.
#[derive(Debug, Clone)]
pub struct Completion {
    pub response: ChatResponse,
    pub usage: Option<TokenUsage>,
}

pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Model identifier requests are billed against.
    fn model(&self) -> &str;

    /// Context window size in tokens, when known for the configured model.
    fn context_window(&self) -> Option<usize> {
        None
    }

    /// # Errors
    ///
    /// Returns an error when the request fails or the response cannot be parsed.
    fn chat_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> impl Future<Output = Result<Completion, LlmError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_content_skips_tool_parts() {
        let msg = Message {
            role: Role::Assistant,
            parts: vec![
                MessagePart::Text {
                    text: "running it".into(),
                },
                MessagePart::ToolUse {
                    id: "toolu_1".into(),
                    name: "execute_bash".into(),
                    input: serde_json::json!({"command": "ls"}),
                },
            ],
        };
        assert_eq!(msg.text_content(), "running it");
    }

    #[test]
    fn assistant_tool_use_orders_text_first() {
        let calls = vec![ToolUseRequest {
            id: "toolu_1".into(),
            name: "read_file".into(),
            input: serde_json::json!({"path": "/tmp/x"}),
        }];
        let msg = Message::assistant_tool_use(Some("checking".into()), &calls);
        assert_eq!(msg.parts.len(), 2);
        assert!(matches!(&msg.parts[0], MessagePart::Text { text } if text == "checking"));
        assert!(matches!(&msg.parts[1], MessagePart::ToolUse { name, .. } if name == "read_file"));
    }

    #[test]
    fn assistant_tool_use_without_text() {
        let calls = vec![ToolUseRequest {
            id: "toolu_1".into(),
            name: "read_file".into(),
            input: serde_json::Value::Null,
        }];
        let msg = Message::assistant_tool_use(None, &calls);
        assert_eq!(msg.parts.len(), 1);
    }

    #[test]
    fn chat_response_accessors() {
        let text = ChatResponse::Text("done".into());
        assert_eq!(text.text(), Some("done"));
        assert!(text.tool_calls().is_empty());

        let with_tools = ChatResponse::ToolUse {
            text: None,
            tool_calls: vec![ToolUseRequest {
                id: "toolu_1".into(),
                name: "search_files".into(),
                input: serde_json::json!({}),
            }],
        };
        assert_eq!(with_tools.text(), None);
        assert_eq!(with_tools.tool_calls().len(), 1);
    }

    #[test]
    fn token_usage_total() {
        let usage = TokenUsage {
            input_tokens: 120,
            output_tokens: 30,
        };
        assert_eq!(usage.total(), 150);
    }

    #[test]
    fn message_roundtrips_through_json() {
        let msg = Message::tool_results(vec![MessagePart::ToolResult {
            tool_use_id: "toolu_9".into(),
            content: "ok".into(),
            is_error: false,
        }]);
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }
}

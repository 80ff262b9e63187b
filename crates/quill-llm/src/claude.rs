use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::{
    ChatResponse, Completion, LlmProvider, Message, MessagePart, Role, TokenUsage, ToolDefinition,
    ToolUseRequest,
};
use crate::retry::send_with_retry;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_RETRIES: u32 = 3;

pub struct ClaudeProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
}

impl fmt::Debug for ClaudeProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaudeProvider")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Clone for ClaudeProvider {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            base_url: self.base_url.clone(),
        }
    }
}

impl ClaudeProvider {
    #[must_use]
    pub fn new(api_key: String, model: String, max_tokens: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            max_tokens,
            base_url: API_URL.into(),
        }
    }

    /// Point at a different messages endpoint, e.g. a proxy.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn build_request(&self, body: &ToolRequestBody<'_>) -> reqwest::RequestBuilder {
        self.client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
    }
}

impl LlmProvider for ClaudeProvider {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> Option<usize> {
        if self.model.contains("opus")
            || self.model.contains("sonnet")
            || self.model.contains("haiku")
        {
            Some(200_000)
        } else {
            None
        }
    }

    async fn chat_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Completion, LlmError> {
        let (system, chat_messages) = split_messages(messages);
        let api_tools: Vec<AnthropicTool> = tools
            .iter()
            .map(|t| AnthropicTool {
                name: &t.name,
                description: &t.description,
                input_schema: &t.parameters,
            })
            .collect();

        let body = ToolRequestBody {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: system.as_deref(),
            messages: &chat_messages,
            tools: &api_tools,
        };

        let response =
            send_with_retry("claude", MAX_RETRIES, || self.build_request(&body).send()).await?;

        let status = response.status();
        let text = response.text().await.map_err(LlmError::Http)?;

        if !status.is_success() {
            tracing::error!("Claude API error {status}: {text}");
            return Err(map_error_status(status.as_u16(), &text));
        }

        let resp: ApiResponse = serde_json::from_str(&text)?;
        if resp.content.is_empty() {
            return Err(LlmError::EmptyResponse { provider: "claude" });
        }
        let usage = resp.usage.map(|u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        });
        Ok(Completion {
            response: parse_content(resp.content),
            usage,
        })
    }
}

fn map_error_status(status: u16, body: &str) -> LlmError {
    match status {
        401 | 403 => LlmError::Auth { provider: "claude" },
        400 => {
            if body.contains("context") && body.contains("length") || body.contains("too long") {
                LlmError::ContextLength
            } else {
                LlmError::InvalidRequest(format!("Claude API rejected request: {body}"))
            }
        }
        500..=599 => LlmError::Server { status },
        _ => LlmError::Other(format!("Claude API request failed (status {status})")),
    }
}

fn parse_content(content: Vec<AnthropicContentBlock>) -> ChatResponse {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in content {
        match block {
            AnthropicContentBlock::Text { text } => text_parts.push(text),
            AnthropicContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolUseRequest { id, name, input });
            }
            AnthropicContentBlock::ToolResult { .. } => {}
        }
    }

    if tool_calls.is_empty() {
        ChatResponse::Text(text_parts.join(""))
    } else {
        let text = if text_parts.is_empty() {
            None
        } else {
            Some(text_parts.join(""))
        };
        ChatResponse::ToolUse { text, tool_calls }
    }
}

fn split_messages(messages: &[Message]) -> (Option<String>, Vec<ApiMessage>) {
    let mut system_parts = Vec::new();
    let mut chat = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system_parts.push(msg.text_content()),
            Role::User | Role::Assistant => {
                let role = if msg.role == Role::User {
                    "user"
                } else {
                    "assistant"
                };
                let blocks: Vec<AnthropicContentBlock> = msg
                    .parts
                    .iter()
                    .filter_map(|part| match part {
                        MessagePart::Text { text } => {
                            if text.is_empty() {
                                None
                            } else {
                                Some(AnthropicContentBlock::Text { text: text.clone() })
                            }
                        }
                        MessagePart::ToolUse { id, name, input } => {
                            Some(AnthropicContentBlock::ToolUse {
                                id: id.clone(),
                                name: name.clone(),
                                input: input.clone(),
                            })
                        }
                        MessagePart::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } => Some(AnthropicContentBlock::ToolResult {
                            tool_use_id: tool_use_id.clone(),
                            content: content.clone(),
                            is_error: *is_error,
                        }),
                    })
                    .collect();
                if !blocks.is_empty() {
                    chat.push(ApiMessage {
                        role: role.to_owned(),
                        content: blocks,
                    });
                }
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    (system, chat)
}

#[derive(Serialize)]
struct ToolRequestBody<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [ApiMessage],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [AnthropicTool<'a>],
}

#[derive(Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

#[derive(Serialize)]
struct ApiMessage {
    role: String,
    content: Vec<AnthropicContentBlock>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
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
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize, Debug)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> ClaudeProvider {
        ClaudeProvider::new("key".into(), "claude-sonnet-4".into(), 1024)
            .with_base_url(format!("{}/v1/messages", server.uri()))
    }

    fn tool_def() -> ToolDefinition {
        ToolDefinition {
            name: "execute_bash".into(),
            description: "run a command".into(),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn context_window_known_for_claude_models() {
        let p = ClaudeProvider::new("k".into(), "claude-sonnet-4".into(), 1024);
        assert_eq!(p.context_window(), Some(200_000));
        let p = ClaudeProvider::new("k".into(), "unknown-model".into(), 1024);
        assert_eq!(p.context_window(), None);
    }

    #[test]
    fn debug_redacts_api_key() {
        let p = ClaudeProvider::new("sk-secret".into(), "claude-sonnet-4".into(), 1024);
        let debug = format!("{p:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("redacted"));
    }

    #[tokio::test]
    async fn text_response_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "hello there"}],
                "usage": {"input_tokens": 12, "output_tokens": 4}
            })))
            .mount(&server)
            .await;

        let completion = provider(&server)
            .chat_with_tools(&[Message::user("hi")], &[])
            .await
            .unwrap();
        assert_eq!(completion.response, ChatResponse::Text("hello there".into()));
        let usage = completion.usage.unwrap();
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.output_tokens, 4);
    }

    #[tokio::test]
    async fn tool_use_response_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [
                    {"type": "text", "text": "let me check"},
                    {"type": "tool_use", "id": "toolu_1", "name": "execute_bash",
                     "input": {"command": "ls"}}
                ]
            })))
            .mount(&server)
            .await;

        let completion = provider(&server)
            .chat_with_tools(&[Message::user("list files")], &[tool_def()])
            .await
            .unwrap();
        let ChatResponse::ToolUse { text, tool_calls } = completion.response else {
            panic!("expected tool use");
        };
        assert_eq!(text.as_deref(), Some("let me check"));
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].name, "execute_bash");
        assert_eq!(tool_calls[0].input["command"], "ls");
    }

    #[tokio::test]
    async fn tools_serialized_into_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(serde_json::json!({
                "tools": [{"name": "execute_bash"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "ok"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        provider(&server)
            .chat_with_tools(&[Message::user("hi")], &[tool_def()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = provider(&server)
            .chat_with_tools(&[Message::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Auth { provider: "claude" }));
    }

    #[tokio::test]
    async fn server_error_maps_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529))
            .mount(&server)
            .await;

        let err = provider(&server)
            .chat_with_tools(&[Message::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Server { status: 529 }));
    }

    #[tokio::test]
    async fn context_overflow_detected_in_400_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"error": {"message": "prompt is too long"}}"#),
            )
            .mount(&server)
            .await;

        let err = provider(&server)
            .chat_with_tools(&[Message::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ContextLength));
    }

    #[tokio::test]
    async fn empty_content_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"content": []})),
            )
            .mount(&server)
            .await;

        let err = provider(&server)
            .chat_with_tools(&[Message::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse { provider: "claude" }));
    }

    #[tokio::test]
    async fn tool_results_sent_as_user_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "messages": [
                    {"role": "user", "content": [{"type": "text", "text": "list files"}]},
                    {"role": "assistant", "content": [
                        {"type": "tool_use", "id": "toolu_1", "name": "execute_bash",
                         "input": {"command": "ls"}}
                    ]},
                    {"role": "user", "content": [
                        {"type": "tool_result", "tool_use_id": "toolu_1", "content": "a.txt"}
                    ]}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "there is one file"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let calls = vec![ToolUseRequest {
            id: "toolu_1".into(),
            name: "execute_bash".into(),
            input: serde_json::json!({"command": "ls"}),
        }];
        let messages = vec![
            Message::user("list files"),
            Message::assistant_tool_use(None, &calls),
            Message::tool_results(vec![MessagePart::ToolResult {
                tool_use_id: "toolu_1".into(),
                content: "a.txt".into(),
                is_error: false,
            }]),
        ];
        provider(&server)
            .chat_with_tools(&messages, &[tool_def()])
            .await
            .unwrap();
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::{
    ChatResponse, Completion, LlmProvider, Message, MessagePart, Role, TokenUsage, ToolDefinition,
    ToolUseRequest,
};
use crate::retry::send_with_retry;

const MAX_RETRIES: u32 = 3;

/// Provider for any OpenAI-compatible chat completions endpoint: OpenRouter,
/// llama.cpp, vLLM, and the hosted services that speak the same dialect.
pub struct CompatibleProvider {
    client: reqwest::Client,
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    context_window: Option<usize>,
}

impl fmt::Debug for CompatibleProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompatibleProvider")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("context_window", &self.context_window)
            .finish_non_exhaustive()
    }
}

impl Clone for CompatibleProvider {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            name: self.name.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            context_window: self.context_window,
        }
    }
}

impl CompatibleProvider {
    #[must_use]
    pub fn new(
        name: String,
        base_url: String,
        api_key: Option<String>,
        model: String,
        max_tokens: u32,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            name,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            model,
            max_tokens,
            context_window: None,
        }
    }

    #[must_use]
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = Some(tokens);
        self
    }

    fn build_request(&self, body: &RequestBody<'_>) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("content-type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header("authorization", format!("Bearer {key}"));
        }
        request
    }
}

impl LlmProvider for CompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> Option<usize> {
        self.context_window
    }

    async fn chat_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Completion, LlmError> {
        let api_messages = convert_messages(messages);
        let api_tools: Vec<ApiTool> = tools
            .iter()
            .map(|t| ApiTool {
                r#type: "function",
                function: ApiFunction {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.parameters,
                },
            })
            .collect();

        let body = RequestBody {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: &api_messages,
            tools: &api_tools,
        };

        let response =
            send_with_retry(&self.name, MAX_RETRIES, || self.build_request(&body).send()).await?;

        let status = response.status();
        let text = response.text().await.map_err(LlmError::Http)?;

        if !status.is_success() {
            tracing::error!("{} API error {status}: {text}", self.name);
            return Err(map_error_status(status.as_u16(), &text));
        }

        let resp: ApiResponse = serde_json::from_str(&text)?;
        let Some(choice) = resp.choices.into_iter().next() else {
            return Err(LlmError::EmptyResponse {
                provider: "compatible",
            });
        };
        let usage = resp.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });
        Ok(Completion {
            response: parse_choice(choice)?,
            usage,
        })
    }
}

fn map_error_status(status: u16, body: &str) -> LlmError {
    match status {
        401 | 403 => LlmError::Auth {
            provider: "compatible",
        },
        400 | 413 => {
            if body.contains("context") || body.contains("too long") || status == 413 {
                LlmError::ContextLength
            } else {
                LlmError::InvalidRequest(format!("request rejected: {body}"))
            }
        }
        500..=599 => LlmError::Server { status },
        _ => LlmError::Other(format!("request failed (status {status})")),
    }
}

fn parse_choice(choice: ApiChoice) -> Result<ChatResponse, LlmError> {
    let text = choice.message.content.filter(|c| !c.is_empty());
    let mut tool_calls = Vec::new();

    for call in choice.message.tool_calls {
        // Arguments arrive as a JSON-encoded string in this dialect.
        let input = match serde_json::from_str(&call.function.arguments) {
            Ok(v) => v,
            Err(_) => serde_json::json!({ "raw_input": call.function.arguments }),
        };
        tool_calls.push(ToolUseRequest {
            id: call.id,
            name: call.function.name,
            input,
        });
    }

    if tool_calls.is_empty() {
        match text {
            Some(text) => Ok(ChatResponse::Text(text)),
            None => Err(LlmError::EmptyResponse {
                provider: "compatible",
            }),
        }
    } else {
        Ok(ChatResponse::ToolUse { text, tool_calls })
    }
}

fn convert_messages(messages: &[Message]) -> Vec<ApiMessage> {
    let mut out = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => out.push(ApiMessage {
                role: "system",
                content: Some(msg.text_content()),
                tool_calls: Vec::new(),
                tool_call_id: None,
            }),
            Role::Assistant => {
                let calls: Vec<ApiToolCall> = msg
                    .parts
                    .iter()
                    .filter_map(|p| match p {
                        MessagePart::ToolUse { id, name, input } => Some(ApiToolCall {
                            id: id.clone(),
                            r#type: "function".into(),
                            function: ApiFunctionCall {
                                name: name.clone(),
                                arguments: input.to_string(),
                            },
                        }),
                        _ => None,
                    })
                    .collect();
                let text = msg.text_content();
                out.push(ApiMessage {
                    role: "assistant",
                    content: if text.is_empty() { None } else { Some(text) },
                    tool_calls: calls,
                    tool_call_id: None,
                });
            }
            Role::User => {
                // Tool results become individual `tool` role messages; any
                // remaining text becomes an ordinary user message.
                for part in &msg.parts {
                    if let MessagePart::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } = part
                    {
                        out.push(ApiMessage {
                            role: "tool",
                            content: Some(content.clone()),
                            tool_calls: Vec::new(),
                            tool_call_id: Some(tool_use_id.clone()),
                        });
                    }
                }
                let text = msg.text_content();
                if !text.is_empty() {
                    out.push(ApiMessage {
                        role: "user",
                        content: Some(text),
                        tool_calls: Vec::new(),
                        tool_call_id: None,
                    });
                }
            }
        }
    }

    out
}

#[derive(Serialize)]
struct RequestBody<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [ApiMessage],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [ApiTool<'a>],
}

#[derive(Serialize)]
struct ApiTool<'a> {
    r#type: &'static str,
    function: ApiFunction<'a>,
}

#[derive(Serialize)]
struct ApiFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ApiToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> CompatibleProvider {
        CompatibleProvider::new(
            "openrouter".into(),
            format!("{}/v1", server.uri()),
            Some("key".into()),
            "qwen-2.5".into(),
            1024,
        )
    }

    #[tokio::test]
    async fn text_response_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "hello"}}],
                "usage": {"prompt_tokens": 9, "completion_tokens": 2}
            })))
            .mount(&server)
            .await;

        let completion = provider(&server)
            .chat_with_tools(&[Message::user("hi")], &[])
            .await
            .unwrap();
        assert_eq!(completion.response, ChatResponse::Text("hello".into()));
        assert_eq!(completion.usage.unwrap().input_tokens, 9);
    }

    #[tokio::test]
    async fn function_call_decoded_from_string_arguments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "read_file",
                            "arguments": "{\"path\": \"/tmp/x\"}"
                        }
                    }]
                }}]
            })))
            .mount(&server)
            .await;

        let completion = provider(&server)
            .chat_with_tools(&[Message::user("read it")], &[])
            .await
            .unwrap();
        let ChatResponse::ToolUse { text, tool_calls } = completion.response else {
            panic!("expected tool use");
        };
        assert_eq!(text, None);
        assert_eq!(tool_calls[0].name, "read_file");
        assert_eq!(tool_calls[0].input["path"], "/tmp/x");
    }

    #[tokio::test]
    async fn unparseable_arguments_wrapped_as_raw_input() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "execute_bash", "arguments": "not json"}
                    }]
                }}]
            })))
            .mount(&server)
            .await;

        let completion = provider(&server)
            .chat_with_tools(&[Message::user("go")], &[])
            .await
            .unwrap();
        let calls = completion.response.tool_calls();
        assert_eq!(calls[0].input["raw_input"], "not json");
    }

    #[tokio::test]
    async fn tool_results_become_tool_role_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "messages": [
                    {"role": "user", "content": "list"},
                    {"role": "assistant", "tool_calls": [
                        {"id": "call_1", "type": "function",
                         "function": {"name": "execute_bash", "arguments": "{\"command\":\"ls\"}"}}
                    ]},
                    {"role": "tool", "content": "a.txt", "tool_call_id": "call_1"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "one file"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let calls = vec![ToolUseRequest {
            id: "call_1".into(),
            name: "execute_bash".into(),
            input: serde_json::json!({"command": "ls"}),
        }];
        let messages = vec![
            Message::user("list"),
            Message::assistant_tool_use(None, &calls),
            Message::tool_results(vec![MessagePart::ToolResult {
                tool_use_id: "call_1".into(),
                content: "a.txt".into(),
                is_error: false,
            }]),
        ];
        provider(&server)
            .chat_with_tools(&messages, &[])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_choices_is_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let err = provider(&server)
            .chat_with_tools(&[Message::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse { .. }));
    }

    #[tokio::test]
    async fn payload_too_large_maps_to_context_length() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(413))
            .mount(&server)
            .await;

        let err = provider(&server)
            .chat_with_tools(&[Message::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ContextLength));
    }

    #[test]
    fn name_and_window_configurable() {
        let p = CompatibleProvider::new(
            "local".into(),
            "http://localhost:8080/v1/".into(),
            None,
            "llama".into(),
            512,
        )
        .with_context_window(32_768);
        assert_eq!(p.name(), "local");
        assert_eq!(p.context_window(), Some(32_768));
    }
}

use std::collections::HashMap;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::tool::{Tool, ToolCall, ToolFuture, ToolResult, deserialize_params};

const MAX_TIMEOUT_SECS: u64 = 120;
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct HttpRequestParams {
    /// URL to request. Only http and https schemes are allowed.
    pub url: String,
    /// HTTP method. One of GET, POST, PUT, PATCH, DELETE, HEAD. Default GET.
    pub method: Option<String>,
    /// Request headers.
    pub headers: Option<HashMap<String, String>>,
    /// Request body, sent verbatim.
    pub body: Option<String>,
    /// Timeout in seconds. Default 30, capped at 120.
    pub timeout: Option<u64>,
}

/// Plain HTTP client tool. Dangerous because it can exfiltrate data or hit
/// arbitrary endpoints.
pub struct HttpRequestTool {
    client: reqwest::Client,
}

impl HttpRequestTool {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestTool {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_method(method: &str) -> Option<reqwest::Method> {
    match method.to_uppercase().as_str() {
        "GET" => Some(reqwest::Method::GET),
        "POST" => Some(reqwest::Method::POST),
        "PUT" => Some(reqwest::Method::PUT),
        "PATCH" => Some(reqwest::Method::PATCH),
        "DELETE" => Some(reqwest::Method::DELETE),
        "HEAD" => Some(reqwest::Method::HEAD),
        _ => None,
    }
}

impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Make an HTTP request and return the status code and response body. \
         Bodies longer than 64 KiB are truncated."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(HttpRequestParams)).unwrap_or_default()
    }

    fn is_dangerous(&self) -> bool {
        true
    }

    fn execute<'a>(&'a self, call: &'a ToolCall) -> ToolFuture<'a> {
        Box::pin(async move {
            let params: HttpRequestParams = match deserialize_params(&call.input) {
                Ok(p) => p,
                Err(e) => return ToolResult::error(call.id.clone(), e.to_string()),
            };

            if !params.url.starts_with("http://") && !params.url.starts_with("https://") {
                return ToolResult::error(
                    call.id.clone(),
                    format!("unsupported URL scheme in {}", params.url),
                );
            }
            let method = params.method.as_deref().unwrap_or("GET");
            let Some(method) = parse_method(method) else {
                return ToolResult::error(
                    call.id.clone(),
                    format!("unsupported HTTP method: {method}"),
                );
            };

            let timeout = Duration::from_secs(
                params.timeout.unwrap_or(30).min(MAX_TIMEOUT_SECS),
            );
            let mut request = self
                .client
                .request(method, &params.url)
                .timeout(timeout);
            if let Some(headers) = &params.headers {
                for (name, value) in headers {
                    request = request.header(name, value);
                }
            }
            if let Some(body) = params.body {
                request = request.body(body);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    return ToolResult::error(call.id.clone(), format!("request failed: {e}"));
                }
            };

            let status = response.status();
            let mut body = match response.text().await {
                Ok(b) => b,
                Err(e) => {
                    return ToolResult::error(
                        call.id.clone(),
                        format!("failed to read response body: {e}"),
                    );
                }
            };
            if body.len() > MAX_BODY_BYTES {
                let mut cut = MAX_BODY_BYTES;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
                body.push_str("\n[truncated]");
            }

            let output = format!("HTTP {}\n{body}", status.as_u16());
            if status.is_success() {
                ToolResult::ok(call.id.clone(), output)
            } else {
                ToolResult {
                    tool_call_id: call.id.clone(),
                    output,
                    error: Some(format!("server returned status {}", status.as_u16())),
                    exit_code: None,
                    is_error: true,
                }
            }
        })
    }
}

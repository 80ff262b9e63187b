use serde_json::{Map, Value};

use quill_llm::ChatResponse;
use quill_tools::ToolCall;

/// Extract executable tool calls from a model response.
///
/// Malformed entries (missing id or name) are skipped with a warning rather
/// than aborting the whole turn. Inputs that arrive as strings are decoded as
/// JSON when possible, otherwise wrapped under `raw_input` so the tool still
/// sees them.
#[must_use]
pub fn parse_tool_calls(response: &ChatResponse) -> Vec<ToolCall> {
    let mut calls = Vec::new();

    for request in response.tool_calls() {
        if request.id.is_empty() || request.name.is_empty() {
            tracing::warn!(
                id = %request.id,
                name = %request.name,
                "skipping malformed tool call"
            );
            continue;
        }
        calls.push(ToolCall {
            id: request.id.clone(),
            name: request.name.clone(),
            input: normalize_input(request.input.clone()),
        });
    }

    calls
}

#[must_use]
pub fn has_tool_calls(response: &ChatResponse) -> bool {
    !response.tool_calls().is_empty()
}

fn normalize_input(input: Value) -> Map<String, Value> {
    match input {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => map,
            _ => {
                let mut map = Map::new();
                map.insert("raw_input".into(), Value::String(s));
                map
            }
        },
        other => {
            let mut map = Map::new();
            map.insert("raw_input".into(), other);
            map
        }
    }
}

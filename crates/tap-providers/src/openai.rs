// SPDX-License-Identifier: MIT OR Apache-2.0

//! OpenAI chat-completions dialect (SSE streaming).

use crate::{Provider, StreamStats};
use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value;
use tap_core::{
    ChatRequest, ChatResponse, ContentBlock, Message, Role, TapError, TokenUsage,
};

/// Wire capability for the OpenAI `/v1/chat/completions` API.
pub struct OpenAiProvider;

#[derive(Deserialize)]
struct WireRequest {
    model: String,
    #[serde(default)]
    messages: Vec<WireMessage>,
    #[serde(default)]
    stream: Option<bool>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    max_completion_tokens: Option<u32>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    top_p: Option<f64>,
    #[serde(default)]
    stop: Option<StopField>,
    #[serde(default)]
    seed: Option<i64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StopField {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    function: Option<WireFunction>,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    /// JSON-encoded argument object.
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct WireResponse {
    model: String,
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChunkChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChunkChoice {
    #[serde(default)]
    delta: Option<WireDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Lower `content` (string, block array, or null) into content blocks.
fn lower_content(content: Option<Value>) -> Vec<ContentBlock> {
    match content {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(text)) => {
            if text.is_empty() {
                Vec::new()
            } else {
                vec![ContentBlock::text(text)]
            }
        }
        Some(Value::Array(items)) => items.into_iter().map(lower_content_part).collect(),
        Some(other) => vec![ContentBlock::Other(other)],
    }
}

fn lower_content_part(part: Value) -> ContentBlock {
    let kind = part.get("type").and_then(Value::as_str);
    match kind {
        Some("text") => ContentBlock::text(
            part.get("text").and_then(Value::as_str).unwrap_or_default(),
        ),
        Some("image_url") => ContentBlock::Image {
            url: part
                .get("image_url")
                .and_then(|u| u.get("url"))
                .and_then(Value::as_str)
                .map(str::to_string),
            data: None,
        },
        _ => ContentBlock::Other(part),
    }
}

fn lower_message(wire: WireMessage) -> Message {
    let role = Role::parse(&wire.role);
    let mut content = if role == Role::Tool {
        // Tool messages carry the tool output as their content.
        match wire.content {
            Some(Value::String(output)) => vec![ContentBlock::tool_result(output)],
            other => lower_content(other),
        }
    } else {
        lower_content(wire.content)
    };
    for call in wire.tool_calls.unwrap_or_default() {
        if let Some(function) = call.function {
            let input = match serde_json::from_str::<Value>(&function.arguments) {
                Ok(Value::Object(map)) => map,
                _ => {
                    let mut map = serde_json::Map::new();
                    if !function.arguments.is_empty() {
                        map.insert(
                            "arguments".to_string(),
                            Value::String(function.arguments),
                        );
                    }
                    map
                }
            };
            content.push(ContentBlock::tool_use(function.name, input));
        }
    }
    Message { role, content }
}

impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn parse_request(&self, body: &[u8]) -> Result<ChatRequest, TapError> {
        let wire: WireRequest = serde_json::from_slice(body)?;
        if wire.model.is_empty() || wire.messages.is_empty() {
            return Err(TapError::Parse(
                "not an openai chat request: missing model or messages".to_string(),
            ));
        }
        let stop = match wire.stop {
            Some(StopField::One(s)) => vec![s],
            Some(StopField::Many(v)) => v,
            None => Vec::new(),
        };
        Ok(ChatRequest {
            model: wire.model,
            messages: wire.messages.into_iter().map(lower_message).collect(),
            stream: wire.stream,
            system: None,
            max_tokens: wire.max_completion_tokens.or(wire.max_tokens),
            temperature: wire.temperature,
            top_p: wire.top_p,
            top_k: None,
            stop,
            seed: wire.seed,
            extra: serde_json::Map::new(),
        })
    }

    fn parse_response(&self, body: &[u8]) -> Result<ChatResponse, TapError> {
        let wire: WireResponse = serde_json::from_slice(body)?;
        let mut choices = wire.choices;
        if choices.is_empty() {
            return Err(TapError::Parse("response has no choices".to_string()));
        }
        let choice = choices.remove(0);
        let message = choice
            .message
            .map(lower_message)
            .ok_or_else(|| TapError::Parse("choice has no message".to_string()))?;
        let usage = wire
            .usage
            .map(|u| TokenUsage::counted(u.prompt_tokens, u.completion_tokens));
        Ok(ChatResponse {
            model: wire.model,
            created_at: wire.created.and_then(|s| DateTime::from_timestamp(s, 0)),
            message,
            done: true,
            stop_reason: choice.finish_reason,
            usage,
            extra: serde_json::Map::new(),
        })
    }

    fn update_stream(&self, payload: &str, stats: &mut StreamStats) {
        if payload.trim() == "[DONE]" {
            stats.done = true;
            return;
        }
        let Ok(chunk) = serde_json::from_str::<WireChunk>(payload) else {
            return;
        };
        for choice in &chunk.choices {
            if let Some(delta) = &choice.delta
                && let Some(content) = &delta.content
            {
                stats.text.push_str(content);
            }
            if let Some(reason) = &choice.finish_reason {
                stats.stop_reason = Some(reason.clone());
            }
        }
        // Usage arrives on the final chunk when the client opted in.
        if let Some(usage) = chunk.usage {
            stats.usage.prompt_tokens = usage.prompt_tokens;
            stats.usage.completion_tokens = usage.completion_tokens;
            stats.usage.finalize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_with_string_and_block_content() {
        let body = br#"{
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": [
                    {"type": "text", "text": "what is this?"},
                    {"type": "image_url", "image_url": {"url": "https://x/i.png"}}
                ]}
            ],
            "stream": true,
            "stop": "END",
            "max_tokens": 100
        }"#;
        let req = OpenAiProvider.parse_request(body).unwrap();
        assert_eq!(req.model, "gpt-4o");
        assert_eq!(req.stream, Some(true));
        assert_eq!(req.stop, vec!["END"]);
        assert_eq!(req.max_tokens, Some(100));
        assert_eq!(req.messages[1].content.len(), 2);
        assert!(matches!(
            &req.messages[1].content[1],
            ContentBlock::Image { url: Some(u), .. } if u == "https://x/i.png"
        ));
    }

    #[test]
    fn lowers_tool_calls_and_tool_results() {
        let body = br#"{
            "model": "gpt-4o",
            "messages": [
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "c1", "type": "function",
                     "function": {"name": "get_weather", "arguments": "{\"city\": \"Paris\"}"}}
                ]},
                {"role": "tool", "tool_call_id": "c1", "content": "18C and clear"}
            ]
        }"#;
        let req = OpenAiProvider.parse_request(body).unwrap();
        let call_text = req.messages[0].plain_text();
        assert_eq!(call_text, "Tool call: get_weather(city: Paris)");
        assert_eq!(req.messages[1].plain_text(), "18C and clear");
    }

    #[test]
    fn parses_completion_response() {
        let body = br#"{
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o",
            "choices": [
                {"index": 0,
                 "message": {"role": "assistant", "content": "Hello!"},
                 "finish_reason": "stop"}
            ],
            "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
        }"#;
        let resp = OpenAiProvider.parse_response(body).unwrap();
        assert!(resp.done);
        assert_eq!(resp.message.plain_text(), "Hello!");
        assert_eq!(resp.stop_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.unwrap().total_tokens, 16);
        assert!(resp.created_at.is_some());
    }

    #[test]
    fn stream_chunks_accumulate() {
        let p = OpenAiProvider;
        let mut stats = StreamStats::default();
        p.update_stream(
            r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#,
            &mut stats,
        );
        p.update_stream(
            r#"{"choices":[{"delta":{"content":"lo"},"finish_reason":"stop"}],"usage":{"prompt_tokens":8,"completion_tokens":2}}"#,
            &mut stats,
        );
        p.update_stream("[DONE]", &mut stats);
        assert_eq!(stats.text, "Hello");
        assert!(stats.done);
        assert_eq!(stats.stop_reason.as_deref(), Some("stop"));
        assert_eq!(stats.usage.total_tokens, 10);
    }

    #[test]
    fn chunk_does_not_parse_as_response() {
        let chunk = br#"{"object":"chat.completion.chunk","model":"m","choices":[{"delta":{"content":"x"}}]}"#;
        assert!(OpenAiProvider.parse_response(chunk).is_err());
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Anthropic Messages API dialect (SSE streaming).

use crate::{Provider, StreamStats};
use serde::Deserialize;
use serde_json::Value;
use tap_core::{
    ChatRequest, ChatResponse, ContentBlock, Message, Role, TapError, TokenUsage,
};

/// Wire capability for the Anthropic `/v1/messages` API.
///
/// The system prompt travels out of band in this dialect; it is
/// materialized as a leading system message so a captured turn carries
/// the whole prompt chain.
pub struct AnthropicProvider;

#[derive(Deserialize)]
struct WireRequest {
    model: String,
    #[serde(default)]
    system: Option<Value>,
    #[serde(default)]
    messages: Vec<WireMessage>,
    #[serde(default)]
    stream: Option<bool>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    top_p: Option<f64>,
    #[serde(default)]
    top_k: Option<u32>,
    #[serde(default)]
    stop_sequences: Vec<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Value,
}

#[derive(Deserialize)]
struct WireResponse {
    model: String,
    #[serde(default)]
    content: Vec<Value>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

impl WireUsage {
    fn lower(&self) -> TokenUsage {
        let prompt = self.input_tokens
            + self.cache_creation_input_tokens
            + self.cache_read_input_tokens;
        let mut usage = TokenUsage::counted(prompt, self.output_tokens);
        usage.cache_creation_input_tokens = self.cache_creation_input_tokens;
        usage.cache_read_input_tokens = self.cache_read_input_tokens;
        usage
    }
}

#[derive(Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<WireEventMessage>,
    #[serde(default)]
    delta: Option<Value>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireEventMessage {
    #[serde(default)]
    usage: Option<WireUsage>,
}

/// Flatten a `system` value (string or text-block array) into plain text.
fn system_text(system: &Value) -> Option<String> {
    match system {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => {
            let text = items
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n");
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    }
}

fn lower_block(block: Value) -> ContentBlock {
    let kind = block.get("type").and_then(Value::as_str);
    match kind {
        Some("text") => ContentBlock::text(
            block.get("text").and_then(Value::as_str).unwrap_or_default(),
        ),
        Some("image") => {
            let source = block.get("source");
            ContentBlock::Image {
                url: source
                    .and_then(|s| s.get("url"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                data: source
                    .and_then(|s| s.get("data"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }
        }
        Some("tool_use") => {
            let name = block
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let input = match block.get("input") {
                Some(Value::Object(map)) => map.clone(),
                _ => serde_json::Map::new(),
            };
            ContentBlock::tool_use(name, input)
        }
        Some("tool_result") => {
            let output = match block.get("content") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n"),
                _ => String::new(),
            };
            ContentBlock::tool_result(output)
        }
        _ => ContentBlock::Other(block),
    }
}

fn lower_content(content: Value) -> Vec<ContentBlock> {
    match content {
        Value::String(text) => {
            if text.is_empty() {
                Vec::new()
            } else {
                vec![ContentBlock::text(text)]
            }
        }
        Value::Array(items) => items.into_iter().map(lower_block).collect(),
        Value::Null => Vec::new(),
        other => vec![ContentBlock::Other(other)],
    }
}

impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn parse_request(&self, body: &[u8]) -> Result<ChatRequest, TapError> {
        let wire: WireRequest = serde_json::from_slice(body)?;
        if wire.model.is_empty() || wire.messages.is_empty() {
            return Err(TapError::Parse(
                "not an anthropic chat request: missing model or messages".to_string(),
            ));
        }
        let system = wire.system.as_ref().and_then(system_text);
        let mut messages = Vec::with_capacity(wire.messages.len() + 1);
        if let Some(text) = &system {
            messages.push(Message::text(Role::System, text.clone()));
        }
        for m in wire.messages {
            messages.push(Message {
                role: Role::parse(&m.role),
                content: lower_content(m.content),
            });
        }
        Ok(ChatRequest {
            model: wire.model,
            messages,
            stream: wire.stream,
            system,
            max_tokens: wire.max_tokens,
            temperature: wire.temperature,
            top_p: wire.top_p,
            top_k: wire.top_k,
            stop: wire.stop_sequences,
            seed: None,
            extra: serde_json::Map::new(),
        })
    }

    fn parse_response(&self, body: &[u8]) -> Result<ChatResponse, TapError> {
        let wire: WireResponse = serde_json::from_slice(body)?;
        if wire.model.is_empty() {
            return Err(TapError::Parse("response has no model".to_string()));
        }
        let message = Message {
            role: Role::Assistant,
            content: wire.content.into_iter().map(lower_block).collect(),
        };
        Ok(ChatResponse {
            model: wire.model,
            created_at: None,
            message,
            done: true,
            stop_reason: wire.stop_reason,
            usage: wire.usage.map(|u| u.lower()),
            extra: serde_json::Map::new(),
        })
    }

    fn update_stream(&self, payload: &str, stats: &mut StreamStats) {
        let Ok(event) = serde_json::from_str::<WireEvent>(payload) else {
            return;
        };
        match event.kind.as_str() {
            "message_start" => {
                if let Some(usage) = event.message.and_then(|m| m.usage) {
                    let lowered = usage.lower();
                    stats.usage.prompt_tokens = lowered.prompt_tokens;
                    stats.usage.cache_creation_input_tokens =
                        lowered.cache_creation_input_tokens;
                    stats.usage.cache_read_input_tokens = lowered.cache_read_input_tokens;
                    stats.usage.finalize();
                }
            }
            "content_block_delta" => {
                if let Some(delta) = &event.delta
                    && delta.get("type").and_then(Value::as_str) == Some("text_delta")
                    && let Some(text) = delta.get("text").and_then(Value::as_str)
                {
                    stats.text.push_str(text);
                }
            }
            "message_delta" => {
                if let Some(usage) = &event.usage {
                    stats.usage.completion_tokens = usage.output_tokens;
                    stats.usage.finalize();
                }
                if let Some(reason) = event
                    .delta
                    .as_ref()
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(Value::as_str)
                {
                    stats.stop_reason = Some(reason.to_string());
                }
            }
            "message_stop" => stats.done = true,
            _ => {}
        }
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ollama `/api/chat` dialect (NDJSON streaming).

use crate::{Provider, StreamStats};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tap_core::{
    ChatRequest, ChatResponse, ContentBlock, Message, Role, TapError, TokenUsage,
};

/// Wire capability for the Ollama chat API.
///
/// Ollama streams by default and frames its stream as newline-delimited
/// JSON; token counts arrive on the `done: true` line.
pub struct OllamaProvider;

#[derive(Deserialize)]
struct WireRequest {
    model: String,
    #[serde(default)]
    messages: Vec<WireMessage>,
    #[serde(default)]
    stream: Option<bool>,
    #[serde(default)]
    options: Option<WireOptions>,
}

#[derive(Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    images: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct WireOptions {
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    top_p: Option<f64>,
    #[serde(default)]
    top_k: Option<u32>,
    #[serde(default)]
    seed: Option<i64>,
    #[serde(default)]
    stop: Option<StopField>,
    #[serde(default)]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StopField {
    One(String),
    Many(Vec<String>),
}

impl StopField {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

#[derive(Deserialize)]
struct WireResponse {
    model: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    total_duration: Option<u64>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    prompt_eval_duration: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

fn lower_message(wire: WireMessage) -> Message {
    let mut content = Vec::new();
    if !wire.content.is_empty() {
        content.push(ContentBlock::text(wire.content));
    }
    for image in wire.images.unwrap_or_default() {
        content.push(ContentBlock::Image {
            url: None,
            data: Some(image),
        });
    }
    Message {
        role: Role::parse(&wire.role),
        content,
    }
}

fn wire_usage(wire: &WireResponse) -> Option<TokenUsage> {
    if wire.prompt_eval_count.is_none() && wire.eval_count.is_none() {
        return None;
    }
    let mut usage = TokenUsage::counted(
        wire.prompt_eval_count.unwrap_or(0),
        wire.eval_count.unwrap_or(0),
    );
    usage.total_duration_ns = wire.total_duration.unwrap_or(0);
    usage.prompt_duration_ns = wire.prompt_eval_duration.unwrap_or(0);
    Some(usage)
}

impl Provider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn default_streaming(&self) -> bool {
        true
    }

    fn parse_request(&self, body: &[u8]) -> Result<ChatRequest, TapError> {
        let wire: WireRequest = serde_json::from_slice(body)?;
        if wire.model.is_empty() || wire.messages.is_empty() {
            return Err(TapError::Parse(
                "not an ollama chat request: missing model or messages".to_string(),
            ));
        }
        let options = wire.options;
        let (temperature, top_p, top_k, seed, stop, max_tokens) = match options {
            Some(o) => (
                o.temperature,
                o.top_p,
                o.top_k,
                o.seed,
                o.stop.map(StopField::into_vec).unwrap_or_default(),
                o.num_predict,
            ),
            None => (None, None, None, None, Vec::new(), None),
        };
        Ok(ChatRequest {
            model: wire.model,
            messages: wire.messages.into_iter().map(lower_message).collect(),
            stream: wire.stream,
            system: None,
            max_tokens,
            temperature,
            top_p,
            top_k,
            stop,
            seed,
            extra: serde_json::Map::new(),
        })
    }

    fn parse_response(&self, body: &[u8]) -> Result<ChatResponse, TapError> {
        let wire: WireResponse = serde_json::from_slice(body)?;
        let usage = wire_usage(&wire);
        let message = match wire.message {
            Some(m) => lower_message(m),
            None => Message {
                role: Role::Assistant,
                content: Vec::new(),
            },
        };
        Ok(ChatResponse {
            model: wire.model,
            created_at: wire.created_at,
            message,
            done: wire.done,
            stop_reason: wire.done_reason,
            usage,
            extra: serde_json::Map::new(),
        })
    }

    fn update_stream(&self, payload: &str, stats: &mut StreamStats) {
        let Ok(wire) = serde_json::from_str::<WireResponse>(payload) else {
            return;
        };
        if let Some(message) = &wire.message {
            stats.text.push_str(&message.content);
        }
        if wire.done {
            stats.done = true;
            stats.stop_reason = wire.done_reason.clone();
            if let Some(usage) = wire_usage(&wire) {
                stats.usage = usage;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_request() {
        let body = br#"{
            "model": "llama3",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "What is 2+2?"}
            ],
            "options": {"temperature": 0.2, "stop": ["END"], "num_predict": 64}
        }"#;
        let req = OllamaProvider.parse_request(body).unwrap();
        assert_eq!(req.model, "llama3");
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, Role::System);
        assert_eq!(req.stream, None);
        assert_eq!(req.temperature, Some(0.2));
        assert_eq!(req.stop, vec!["END"]);
        assert_eq!(req.max_tokens, Some(64));
    }

    #[test]
    fn rejects_non_chat_body() {
        assert!(OllamaProvider.parse_request(br#"{"name": "llama3"}"#).is_err());
        assert!(OllamaProvider.parse_request(b"not json").is_err());
        assert!(
            OllamaProvider
                .parse_request(br#"{"model": "m", "messages": []}"#)
                .is_err()
        );
    }

    #[test]
    fn parses_response_with_counts() {
        let body = br#"{
            "model": "m",
            "message": {"role": "assistant", "content": "4."},
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 10,
            "eval_count": 5,
            "total_duration": 123456,
            "prompt_eval_duration": 1000
        }"#;
        let resp = OllamaProvider.parse_response(body).unwrap();
        assert!(resp.done);
        assert_eq!(resp.message.plain_text(), "4.");
        assert_eq!(resp.stop_reason.as_deref(), Some("stop"));
        let usage = resp.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 15);
        assert_eq!(usage.total_duration_ns, 123456);
    }

    #[test]
    fn stream_accumulates_text_and_final_counts() {
        let mut stats = StreamStats::default();
        let p = OllamaProvider;
        p.update_stream(
            r#"{"model":"m","message":{"role":"assistant","content":"Hel"},"done":false}"#,
            &mut stats,
        );
        p.update_stream(
            r#"{"model":"m","message":{"role":"assistant","content":"lo"},"done":false}"#,
            &mut stats,
        );
        p.update_stream(
            r#"{"model":"m","message":{"role":"assistant","content":""},"done":true,"done_reason":"stop","prompt_eval_count":7,"eval_count":3}"#,
            &mut stats,
        );
        assert_eq!(stats.text, "Hello");
        assert!(stats.done);
        assert_eq!(stats.usage.prompt_tokens, 7);
        assert_eq!(stats.usage.completion_tokens, 3);
        assert_eq!(stats.usage.total_tokens, 10);
        assert_eq!(stats.stop_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn malformed_stream_payload_ignored() {
        let mut stats = StreamStats::default();
        OllamaProvider.update_stream("{broken", &mut stats);
        assert_eq!(stats.text, "");
        assert!(!stats.done);
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider-neutral chat request/response records.

use crate::content::Message;
use crate::usage::TokenUsage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat completion request, lowered out of a provider wire format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Requested model identifier.
    pub model: String,
    /// Ordered conversation history, oldest first.
    pub messages: Vec<Message>,
    /// Explicit streaming flag, when the client set one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// System prompt, for providers that carry it out of band.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Completion token ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Top-k sampling cutoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Stop sequences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// Sampling seed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    /// Provider fields that have no neutral projection.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A chat completion response, lowered out of a provider wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Model that produced the response.
    pub model: String,
    /// Server-side creation timestamp, when the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// The assistant message.
    pub message: Message,
    /// Whether the response is complete.
    pub done: bool,
    /// Why generation stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    /// Token accounting, when the provider reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Provider fields that have no neutral projection.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChatResponse {
    /// Build a minimal completed response carrying only assistant text.
    ///
    /// Used when a stream finishes without a parseable final chunk but
    /// assistant text was accumulated along the way.
    #[must_use]
    pub fn synthesized(model: &str, text: String) -> Self {
        Self {
            model: model.to_string(),
            created_at: None,
            message: Message::text(crate::Role::Assistant, text),
            done: true,
            stop_reason: None,
            usage: None,
            extra: serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;

    #[test]
    fn request_optional_fields_omitted() {
        let req = ChatRequest {
            model: "m".into(),
            messages: vec![Message::text(Role::User, "hi")],
            ..ChatRequest::default()
        };
        let v = serde_json::to_value(&req).unwrap();
        assert!(v.get("stream").is_none());
        assert!(v.get("stop").is_none());
        assert!(v.get("extra").is_none());
    }

    #[test]
    fn synthesized_response_is_done_assistant() {
        let resp = ChatResponse::synthesized("m", "partial text".into());
        assert!(resp.done);
        assert_eq!(resp.message.role, Role::Assistant);
        assert_eq!(resp.message.plain_text(), "partial text");
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Provider wire-format capabilities.
//!
//! Each LLM family implements [`Provider`]: decoding its native chat
//! request/response bodies into the neutral [`tap_core::ChatRequest`] /
//! [`tap_core::ChatResponse`] pair, and folding its streaming payloads
//! into a running [`StreamStats`]. The proxy selects a provider per
//! route and never looks inside a wire format itself.

mod anthropic;
mod ollama;
mod openai;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use std::collections::HashMap;
use std::sync::Arc;
use tap_core::{ChatRequest, ChatResponse, TapError, TokenUsage};

/// Telemetry accumulated while a response streams through the tee.
///
/// The forwarder feeds every event payload into
/// [`Provider::update_stream`]; when the stream completes these stats
/// patch holes in the reconstructed final response.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    /// Concatenated assistant text deltas.
    pub text: String,
    /// Running token accounting.
    pub usage: TokenUsage,
    /// Stop reason reported mid-stream, if any.
    pub stop_reason: Option<String>,
    /// Whether the provider signalled completion.
    pub done: bool,
}

/// A single LLM wire dialect.
pub trait Provider: Send + Sync {
    /// Stable provider family name (`"openai"`, `"anthropic"`, `"ollama"`).
    fn name(&self) -> &'static str;

    /// Whether chat requests stream by default when the client does not
    /// set an explicit `stream` flag.
    fn default_streaming(&self) -> bool {
        false
    }

    /// Decode a chat request body.
    ///
    /// # Errors
    ///
    /// [`TapError::Parse`] when the bytes are not a chat request in this
    /// dialect. Non-chat traffic is expected to fail here; the proxy
    /// forwards it untouched.
    fn parse_request(&self, body: &[u8]) -> Result<ChatRequest, TapError>;

    /// Decode a complete (non-streaming or final-chunk) response body.
    ///
    /// # Errors
    ///
    /// [`TapError::Parse`] when the bytes are not a complete response.
    fn parse_response(&self, body: &[u8]) -> Result<ChatResponse, TapError>;

    /// Fold one streaming event payload into the running stats.
    ///
    /// Unrecognized payloads are ignored; this must never fail, because a
    /// malformed mid-stream event must not interrupt forwarding.
    fn update_stream(&self, payload: &str, stats: &mut StreamStats);
}

/// Look up a built-in provider by name.
#[must_use]
pub fn builtin(name: &str) -> Option<Arc<dyn Provider>> {
    match name {
        "anthropic" => Some(Arc::new(AnthropicProvider)),
        "ollama" => Some(Arc::new(OllamaProvider)),
        "openai" => Some(Arc::new(OpenAiProvider)),
        _ => None,
    }
}

/// Names of every built-in provider.
#[must_use]
pub fn builtin_names() -> &'static [&'static str] {
    &["anthropic", "ollama", "openai"]
}

/// Registry of all built-in providers, keyed by name.
#[must_use]
pub fn registry() -> HashMap<String, Arc<dyn Provider>> {
    builtin_names()
        .iter()
        .filter_map(|name| builtin(name).map(|p| (name.to_string(), p)))
        .collect()
}

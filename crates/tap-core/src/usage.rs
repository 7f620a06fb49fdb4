// SPDX-License-Identifier: MIT OR Apache-2.0

//! Token accounting attached to assistant nodes as metadata.

use serde::{Deserialize, Serialize};

/// Token and timing counters for one completed turn.
///
/// All counters are non-negative. Usage is metadata: it never participates
/// in node hashing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt, including cached tokens.
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Tokens produced by the completion.
    #[serde(default)]
    pub completion_tokens: u64,
    /// Sum of prompt and completion tokens.
    #[serde(default)]
    pub total_tokens: u64,
    /// Tokens written to the provider prompt cache.
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    /// Tokens served from the provider prompt cache.
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    /// Wall-clock duration of the whole call, in nanoseconds.
    #[serde(default)]
    pub total_duration_ns: u64,
    /// Time spent evaluating the prompt, in nanoseconds.
    #[serde(default)]
    pub prompt_duration_ns: u64,
}

impl TokenUsage {
    /// Construct a usage record from prompt/completion counts, deriving
    /// the total.
    #[must_use]
    pub fn counted(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            ..Self::default()
        }
    }

    /// Returns `true` when every counter is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Recompute `total_tokens` from the prompt and completion counters.
    pub fn finalize(&mut self) {
        self.total_tokens = self.prompt_tokens + self.completion_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counted_derives_total() {
        let u = TokenUsage::counted(10, 5);
        assert_eq!(u.total_tokens, 15);
        assert!(!u.is_zero());
    }

    #[test]
    fn default_is_zero() {
        assert!(TokenUsage::default().is_zero());
    }

    #[test]
    fn missing_fields_default_on_deserialize() {
        let u: TokenUsage = serde_json::from_str(r#"{"prompt_tokens": 7}"#).unwrap();
        assert_eq!(u.prompt_tokens, 7);
        assert_eq!(u.completion_tokens, 0);
    }
}

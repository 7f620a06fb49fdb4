// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared error taxonomy.

/// Unified error taxonomy for llm-tap.
///
/// Every fallible operation in the workspace surfaces one of these kinds.
/// The forwarding path treats all of them as observable-but-invisible to
/// the client except where the HTTP surface maps them explicitly
/// (`InvalidInput` → 400, `NotFound` → 404, `Upstream` → 502,
/// `CapabilityUnavailable` → 503).
#[derive(Debug, thiserror::Error)]
pub enum TapError {
    /// A caller supplied a malformed or empty value.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A component reached a state it cannot proceed from.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A node hash is absent from the store.
    #[error("not found: {0}")]
    NotFound(String),

    /// A provider could not decode request or response bytes.
    #[error("parse error: {0}")]
    Parse(String),

    /// Network failure or error response from the upstream.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Backend I/O failure in a storage layer.
    #[error("storage error: {0}")]
    Storage(String),

    /// An optional capability (embedder, vector store) is not configured.
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// The worker queue rejected a job because it is at capacity.
    #[error("queue full")]
    QueueFull,
}

impl TapError {
    /// Stable machine-readable kind tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidState(_) => "invalid_state",
            Self::NotFound(_) => "not_found",
            Self::Parse(_) => "parse_error",
            Self::Upstream(_) => "upstream_error",
            Self::Storage(_) => "storage_error",
            Self::CapabilityUnavailable(_) => "capability_unavailable",
            Self::QueueFull => "queue_full",
        }
    }

    /// Returns `true` if this error means a requested record is missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for TapError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(TapError::QueueFull.kind(), "queue_full");
        assert_eq!(TapError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(TapError::Parse("y".into()).kind(), "parse_error");
    }

    #[test]
    fn not_found_predicate() {
        assert!(TapError::NotFound("abc".into()).is_not_found());
        assert!(!TapError::QueueFull.is_not_found());
    }

    #[test]
    fn serde_error_converts_to_parse() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let tap: TapError = err.into();
        assert_eq!(tap.kind(), "parse_error");
    }
}

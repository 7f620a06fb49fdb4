// SPDX-License-Identifier: MIT OR Apache-2.0

//! The hashable body of a conversation node.

use crate::content::{ContentBlock, Message, Role};
use serde::{Deserialize, Serialize};

/// The semantic content of one message — and nothing else.
///
/// A bucket holds exactly what two independent observers of the same
/// message would agree on: role, ordered content blocks, model, provider,
/// and the optional agent name. No timestamps, no counters, no
/// identifiers. Node identity (and therefore prefix deduplication) is a
/// hash over this struct plus the parent hash.
///
/// Construct buckets through [`Bucket::message`]: it canonicalizes an
/// empty `agent_name` to absent so missing and empty agents hash
/// identically. Unicode normalization of every string — including nested
/// tool arguments and opaque blocks — happens in the canonical hash
/// rendering ([`crate::canonical`]), not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Record kind discriminator. Always `"message"` today.
    #[serde(rename = "type")]
    pub kind: String,
    /// Message author.
    pub role: Role,
    /// Ordered content blocks.
    pub content: Vec<ContentBlock>,
    /// Model that produced or received the message.
    pub model: String,
    /// Provider family name.
    pub provider: String,
    /// Agent identity the traffic was routed under, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
}

impl Bucket {
    /// Bucket kind for chat messages.
    pub const KIND_MESSAGE: &'static str = "message";

    /// Build a message bucket.
    #[must_use]
    pub fn message(
        role: Role,
        content: Vec<ContentBlock>,
        model: &str,
        provider: &str,
        agent_name: Option<String>,
    ) -> Self {
        Self {
            kind: Self::KIND_MESSAGE.to_string(),
            role,
            content,
            model: model.to_string(),
            provider: provider.to_string(),
            agent_name: agent_name.filter(|name| !name.is_empty()),
        }
    }

    /// Build a bucket from a parsed [`Message`].
    #[must_use]
    pub fn from_message(
        message: &Message,
        model: &str,
        provider: &str,
        agent_name: Option<String>,
    ) -> Self {
        Self::message(
            message.role,
            message.content.clone(),
            model,
            provider,
            agent_name,
        )
    }

    /// Plain-text projection of this bucket's content.
    #[must_use]
    pub fn plain_text(&self) -> String {
        Message {
            role: self.role,
            content: self.content.clone(),
        }
        .plain_text()
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Messages and their content blocks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System prompt.
    System,
    /// End-user message.
    User,
    /// Model response.
    Assistant,
    /// Tool execution result.
    Tool,
}

impl Role {
    /// Wire-format string for this role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    /// Parse a wire-format role string. Unknown strings map to [`Role::User`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "system" => Self::System,
            "assistant" => Self::Assistant,
            "tool" => Self::Tool,
            _ => Self::User,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One block of message content.
///
/// The `type` tag discriminates the known kinds; anything else is carried
/// opaquely in [`ContentBlock::Other`] so an unrecognized provider payload
/// survives a store/load round trip untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain UTF-8 text.
    Text {
        /// The text payload.
        text: String,
    },
    /// An image, referenced by URL or inlined as base64.
    Image {
        /// Remote image location.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        /// Base64-encoded image bytes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },
    /// A tool invocation requested by the model.
    ToolUse {
        /// Tool name.
        name: String,
        /// Ordered tool arguments.
        #[serde(default)]
        input: serde_json::Map<String, serde_json::Value>,
    },
    /// Output produced by a tool.
    ToolResult {
        /// Tool output text.
        #[serde(default)]
        output: String,
    },
    /// An unknown block kind, preserved verbatim.
    #[serde(untagged)]
    Other(serde_json::Value),
}

impl ContentBlock {
    /// Construct a text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Construct a tool-use block.
    #[must_use]
    pub fn tool_use(
        name: impl Into<String>,
        input: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self::ToolUse {
            name: name.into(),
            input,
        }
    }

    /// Construct a tool-result block.
    #[must_use]
    pub fn tool_result(output: impl Into<String>) -> Self {
        Self::ToolResult {
            output: output.into(),
        }
    }
}

/// A single chat message: a role plus an ordered sequence of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message author.
    pub role: Role,
    /// Ordered content blocks.
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Construct a message with a single text block.
    #[must_use]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// Concatenated plain-text projection of this message.
    ///
    /// Text blocks contribute their text, tool results their output, and
    /// tool calls a `Tool call: name(k: v, …)` rendering. Images and
    /// unknown blocks contribute nothing. Parts are newline-joined.
    /// This is the string used for embeddings and previews.
    #[must_use]
    pub fn plain_text(&self) -> String {
        let mut parts = Vec::new();
        for block in &self.content {
            match block {
                ContentBlock::Text { text } => {
                    if !text.is_empty() {
                        parts.push(text.clone());
                    }
                }
                ContentBlock::ToolResult { output } => {
                    if !output.is_empty() {
                        parts.push(output.clone());
                    }
                }
                ContentBlock::ToolUse { name, input } => {
                    let args = input
                        .iter()
                        .map(|(k, v)| match v {
                            serde_json::Value::String(s) => format!("{k}: {s}"),
                            other => format!("{k}: {other}"),
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    parts.push(format!("Tool call: {name}({args})"));
                }
                ContentBlock::Image { .. } | ContentBlock::Other(_) => {}
            }
        }
        parts.join("\n")
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Core data model for llm-tap.
//!
//! This crate defines the vocabulary shared by every other crate in the
//! workspace: chat messages and their content blocks, the hashable
//! [`Bucket`] that gives a conversation node its identity, the stored
//! [`Node`] itself, token accounting, the provider-neutral
//! [`ChatRequest`]/[`ChatResponse`] pair, and the [`TapError`] taxonomy.
//!
//! Node identity is a SHA-256 over a canonical JSON rendering of the
//! parent hash and the bucket (see [`canonical`]), so two processes that
//! observe the same message under the same parent always agree on the
//! hash. Everything outside the bucket is metadata and never affects
//! identity.

mod bucket;
pub mod canonical;
mod chat;
mod content;
mod error;
mod node;
mod usage;

pub use bucket::Bucket;
pub use chat::{ChatRequest, ChatResponse};
pub use content::{ContentBlock, Message, Role};
pub use error::TapError;
pub use node::Node;
pub use usage::TokenUsage;

// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Content-addressed storage for the conversation DAG.
//!
//! A [`DagStore`] holds immutable [`tap_core::Node`]s keyed by their
//! canonical hash. Insertion is idempotent — writing a hash that already
//! exists is a no-op — which is what collapses replayed conversation
//! prefixes into a single chain and makes branches appear wherever two
//! turns diverge.
//!
//! Two backends ship in-tree: [`MemoryStore`] for tests and ephemeral
//! runs, and [`SqliteStore`] for persistence. [`DagView`] projects a
//! single-rooted branch of the stored graph into memory for traversal.

mod memory;
mod sqlite;
mod store;
mod view;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::DagStore;
pub use view::DagView;

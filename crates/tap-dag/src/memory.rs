// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory reference backend.

use crate::store::{DagStore, validate_node};
use std::collections::HashMap;
use std::sync::RwLock;
use tap_core::{Node, TapError};

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, Node>,
    /// parent hash → child hashes, insertion order.
    children: HashMap<String, Vec<String>>,
    /// root hashes, insertion order.
    roots: Vec<String>,
    /// all hashes, insertion order; backs the stable `list` order.
    order: Vec<String>,
}

/// Reference [`DagStore`] backend: a reader/writer lock over a
/// hash-keyed map plus a parent index.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().expect("store lock poisoned").order.len()
    }

    /// Returns `true` when no nodes are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DagStore for MemoryStore {
    fn put(&self, node: &Node) -> Result<bool, TapError> {
        validate_node(node)?;
        let mut inner = self.inner.write().expect("store lock poisoned");
        if inner.nodes.contains_key(&node.hash) {
            return Ok(false);
        }
        match &node.parent_hash {
            Some(parent) => inner
                .children
                .entry(parent.clone())
                .or_default()
                .push(node.hash.clone()),
            None => inner.roots.push(node.hash.clone()),
        }
        inner.order.push(node.hash.clone());
        inner.nodes.insert(node.hash.clone(), node.clone());
        Ok(true)
    }

    fn get(&self, hash: &str) -> Result<Node, TapError> {
        let inner = self.inner.read().expect("store lock poisoned");
        inner
            .nodes
            .get(hash)
            .cloned()
            .ok_or_else(|| TapError::NotFound(hash.to_string()))
    }

    fn has(&self, hash: &str) -> Result<bool, TapError> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner.nodes.contains_key(hash))
    }

    fn children_of(&self, parent: Option<&str>) -> Result<Vec<Node>, TapError> {
        let inner = self.inner.read().expect("store lock poisoned");
        let hashes = match parent {
            None => &inner.roots,
            Some(p) => match inner.children.get(p) {
                Some(kids) => kids,
                None => return Ok(Vec::new()),
            },
        };
        Ok(hashes
            .iter()
            .filter_map(|h| inner.nodes.get(h).cloned())
            .collect())
    }

    fn list(&self) -> Result<Vec<Node>, TapError> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner
            .order
            .iter()
            .filter_map(|h| inner.nodes.get(h).cloned())
            .collect())
    }

    fn leaves(&self) -> Result<Vec<Node>, TapError> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner
            .order
            .iter()
            .filter(|h| inner.children.get(*h).is_none_or(|kids| kids.is_empty()))
            .filter_map(|h| inner.nodes.get(h).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tap_core::{Bucket, ContentBlock, Role};

    fn node(text: &str, parent: Option<String>) -> Node {
        let bucket = Bucket::message(
            Role::User,
            vec![ContentBlock::text(text)],
            "m",
            "ollama",
            None,
        );
        Node::new(parent, bucket).unwrap()
    }

    #[test]
    fn put_then_get() {
        let store = MemoryStore::new();
        let n = node("a", None);
        assert!(store.put(&n).unwrap());
        assert_eq!(store.get(&n.hash).unwrap(), n);
        assert!(store.has(&n.hash).unwrap());
    }

    #[test]
    fn duplicate_put_is_noop_and_keeps_metadata() {
        let store = MemoryStore::new();
        let first = node("a", None).with_stop_reason(Some("end_turn".into()));
        assert!(store.put(&first).unwrap());

        let second = node("a", None).with_stop_reason(Some("other".into()));
        assert_eq!(first.hash, second.hash);
        assert!(!store.put(&second).unwrap());
        assert_eq!(
            store.get(&first.hash).unwrap().stop_reason.as_deref(),
            Some("end_turn")
        );
    }

    #[test]
    fn rejects_tampered_hash() {
        let store = MemoryStore::new();
        let mut n = node("a", None);
        n.hash = "f".repeat(64);
        let err = store.put(&n).unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[test]
    fn missing_hash_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get(&"0".repeat(64)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn put_allows_dangling_parent() {
        let store = MemoryStore::new();
        let phantom_parent = node("never written", None);
        let child = node("child", Some(phantom_parent.hash.clone()));
        assert!(store.put(&child).unwrap());
        // The chain is broken until the parent lands.
        assert!(store.ancestry(&child.hash).unwrap_err().is_not_found());
        assert!(store.put(&phantom_parent).unwrap());
        assert_eq!(store.ancestry(&child.hash).unwrap().len(), 2);
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! The storage capability contract.

use std::collections::HashSet;
use tap_core::{Node, TapError};

/// Content-addressed persistent store of conversation nodes.
///
/// Implementations must provide idempotent [`put`](Self::put) and
/// concurrent-safe reads. A node is either fully written or not written;
/// partial writes are forbidden. `put` may reference a parent that is not
/// yet present — turn-level chains are written parent-before-child, but
/// referential integrity is only re-established once the whole turn has
/// landed, so backends must not enforce it on write.
pub trait DagStore: Send + Sync {
    /// Insert a node if its hash is absent.
    ///
    /// Returns `true` when the node was new, `false` when the hash already
    /// existed (in which case the stored record, including its metadata,
    /// is left untouched).
    ///
    /// # Errors
    ///
    /// [`TapError::InvalidInput`] for a structurally invalid node,
    /// [`TapError::Storage`] on backend failure.
    fn put(&self, node: &Node) -> Result<bool, TapError>;

    /// Fetch a node by hash.
    ///
    /// # Errors
    ///
    /// [`TapError::NotFound`] when the hash is absent.
    fn get(&self, hash: &str) -> Result<Node, TapError>;

    /// Returns `true` when the hash is present.
    ///
    /// # Errors
    ///
    /// [`TapError::Storage`] on backend failure.
    fn has(&self, hash: &str) -> Result<bool, TapError>;

    /// All children of `parent`, or all roots when `parent` is `None`.
    ///
    /// # Errors
    ///
    /// [`TapError::Storage`] on backend failure.
    fn children_of(&self, parent: Option<&str>) -> Result<Vec<Node>, TapError>;

    /// Every stored node. Order is unspecified but stable per backend.
    ///
    /// # Errors
    ///
    /// [`TapError::Storage`] on backend failure.
    fn list(&self) -> Result<Vec<Node>, TapError>;

    /// All nodes without a parent.
    ///
    /// # Errors
    ///
    /// [`TapError::Storage`] on backend failure.
    fn roots(&self) -> Result<Vec<Node>, TapError> {
        self.children_of(None)
    }

    /// All nodes that no stored node references as a parent.
    ///
    /// # Errors
    ///
    /// [`TapError::Storage`] on backend failure.
    fn leaves(&self) -> Result<Vec<Node>, TapError> {
        let nodes = self.list()?;
        let parents: HashSet<&str> = nodes
            .iter()
            .filter_map(|n| n.parent_hash.as_deref())
            .collect();
        Ok(nodes
            .iter()
            .filter(|n| !parents.contains(n.hash.as_str()))
            .cloned()
            .collect())
    }

    /// The chain from `hash` up to its root, `hash` first.
    ///
    /// # Errors
    ///
    /// [`TapError::NotFound`] at the first missing link.
    fn ancestry(&self, hash: &str) -> Result<Vec<Node>, TapError> {
        let mut out = Vec::new();
        let mut cursor = Some(hash.to_string());
        while let Some(h) = cursor {
            let node = self.get(&h)?;
            cursor = node.parent_hash.clone();
            out.push(node);
        }
        Ok(out)
    }

    /// Distance from `hash` to its root; 0 for roots.
    ///
    /// # Errors
    ///
    /// [`TapError::NotFound`] at the first missing link.
    fn depth(&self, hash: &str) -> Result<usize, TapError> {
        Ok(self.ancestry(hash)?.len().saturating_sub(1))
    }

    /// Release backend resources. Further calls may fail.
    ///
    /// # Errors
    ///
    /// [`TapError::Storage`] on backend failure.
    fn close(&self) -> Result<(), TapError> {
        Ok(())
    }
}

/// Reject nodes that could corrupt the content-addressing invariants.
pub(crate) fn validate_node(node: &Node) -> Result<(), TapError> {
    if node.hash.len() != 64
        || !node
            .hash
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    {
        return Err(TapError::InvalidInput(format!(
            "node hash is not 64 lowercase hex chars: {:?}",
            node.hash
        )));
    }
    if !node.verify_hash() {
        return Err(TapError::InvalidInput(
            "node hash does not match its parent and bucket".to_string(),
        ));
    }
    Ok(())
}

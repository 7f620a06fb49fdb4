// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory projection of a single-rooted branch.

use crate::store::DagStore;
use std::collections::HashMap;
use tap_core::{Node, TapError};

/// A transient graph loaded around one focus node.
///
/// The view contains every ancestor of the focus hash up to its root and
/// every transitive descendant of the focus; siblings of ancestors that
/// are neither ancestors nor descendants of the focus are excluded.
/// Parent links are indexes into the view's hash-keyed map — ownership
/// runs top-down from the root.
#[derive(Debug)]
pub struct DagView {
    nodes: HashMap<String, Node>,
    children: HashMap<String, Vec<String>>,
    root: String,
}

impl DagView {
    /// Load the view around `hash`.
    ///
    /// # Errors
    ///
    /// [`TapError::NotFound`] when `hash` or any ancestry link is absent,
    /// [`TapError::InvalidState`] when the loaded graph does not have
    /// exactly one root.
    pub fn load(store: &dyn DagStore, hash: &str) -> Result<Self, TapError> {
        let mut nodes = HashMap::new();
        let mut children: HashMap<String, Vec<String>> = HashMap::new();

        // Upward: the unique path from the focus to its root.
        let ancestry = store.ancestry(hash)?;
        let root = ancestry
            .last()
            .ok_or_else(|| TapError::InvalidState("empty ancestry".to_string()))?
            .hash
            .clone();
        for node in &ancestry {
            if let Some(parent) = &node.parent_hash {
                children
                    .entry(parent.clone())
                    .or_default()
                    .push(node.hash.clone());
            }
        }
        for node in ancestry {
            nodes.insert(node.hash.clone(), node);
        }

        // Downward: depth-first expansion of the focus subtree.
        let mut stack = vec![hash.to_string()];
        while let Some(current) = stack.pop() {
            for kid in store.children_of(Some(&current))? {
                children
                    .entry(current.clone())
                    .or_default()
                    .push(kid.hash.clone());
                stack.push(kid.hash.clone());
                nodes.insert(kid.hash.clone(), kid);
            }
        }

        let root_count = nodes.values().filter(|n| n.parent_hash.is_none()).count();
        if root_count != 1 {
            return Err(TapError::InvalidState(format!(
                "view has {root_count} roots, expected 1"
            )));
        }

        Ok(Self {
            nodes,
            children,
            root,
        })
    }

    /// Fetch a node from the view.
    #[must_use]
    pub fn get(&self, hash: &str) -> Option<&Node> {
        self.nodes.get(hash)
    }

    /// Number of nodes in the view.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A loaded view always contains at least its focus node.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The single root of the view.
    #[must_use]
    pub fn root(&self) -> &Node {
        &self.nodes[&self.root]
    }

    /// Nodes with no children in the view, ordered by hash.
    #[must_use]
    pub fn leaves(&self) -> Vec<&Node> {
        let mut out: Vec<&Node> = self
            .nodes
            .values()
            .filter(|n| {
                self.children
                    .get(&n.hash)
                    .is_none_or(|kids| kids.is_empty())
            })
            .collect();
        out.sort_by(|a, b| a.hash.cmp(&b.hash));
        out
    }

    /// The chain from `hash` up to the root, `hash` first.
    ///
    /// # Errors
    ///
    /// [`TapError::NotFound`] when `hash` is not in the view.
    pub fn ancestors(&self, hash: &str) -> Result<Vec<&Node>, TapError> {
        let mut out = Vec::new();
        let mut cursor = Some(hash);
        while let Some(h) = cursor {
            let node = self
                .nodes
                .get(h)
                .ok_or_else(|| TapError::NotFound(h.to_string()))?;
            cursor = node.parent_hash.as_deref();
            out.push(node);
        }
        Ok(out)
    }

    /// Strict descendants of `hash`, depth-first, children of each node
    /// concatenated in load order.
    #[must_use]
    pub fn descendants(&self, hash: &str) -> Vec<&Node> {
        let mut out = Vec::new();
        self.collect_descendants(hash, &mut out);
        out
    }

    fn collect_descendants<'a>(&'a self, hash: &str, out: &mut Vec<&'a Node>) {
        if let Some(kids) = self.children.get(hash) {
            for kid in kids {
                if let Some(node) = self.nodes.get(kid) {
                    out.push(node);
                    self.collect_descendants(kid, out);
                }
            }
        }
    }

    /// Returns `true` when `hash` has more than one child in the view.
    #[must_use]
    pub fn is_branching(&self, hash: &str) -> bool {
        self.children.get(hash).is_some_and(|kids| kids.len() > 1)
    }

    /// All branch points, ordered by hash.
    #[must_use]
    pub fn branch_points(&self) -> Vec<&Node> {
        let mut out: Vec<&Node> = self
            .children
            .iter()
            .filter(|(_, kids)| kids.len() > 1)
            .filter_map(|(hash, _)| self.nodes.get(hash))
            .collect();
        out.sort_by(|a, b| a.hash.cmp(&b.hash));
        out
    }

    /// Depth-first walk from the root toward the leaves.
    ///
    /// The visitor returns `Ok(true)` to descend into a node's children,
    /// `Ok(false)` to prune that subtree cleanly, or `Err` to abort the
    /// walk and surface the error.
    ///
    /// # Errors
    ///
    /// Whatever the visitor returns.
    pub fn walk<E>(
        &self,
        mut visitor: impl FnMut(&Node) -> Result<bool, E>,
    ) -> Result<(), E> {
        self.walk_from(&self.root.clone(), &mut visitor)
    }

    fn walk_from<E>(
        &self,
        hash: &str,
        visitor: &mut impl FnMut(&Node) -> Result<bool, E>,
    ) -> Result<(), E> {
        let Some(node) = self.nodes.get(hash) else {
            return Ok(());
        };
        if !visitor(node)? {
            return Ok(());
        }
        if let Some(kids) = self.children.get(hash) {
            for kid in kids {
                self.walk_from(kid, visitor)?;
            }
        }
        Ok(())
    }
}

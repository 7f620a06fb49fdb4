// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stored conversation nodes and their content-addressed identity.

use crate::bucket::Bucket;
use crate::canonical::canonical_json;
use crate::error::TapError;
use crate::usage::TokenUsage;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

/// One message in the conversation DAG.
///
/// `hash` is the SHA-256 of the canonical JSON of `(parent, bucket)` and
/// is the node's identity everywhere in the system. The fields outside
/// the bucket (`stop_reason`, `usage`, `project`) are observational
/// metadata: the first writer of a hash sets them, later writers are
/// ignored, and none of them participate in the hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Lowercase hex SHA-256 identity.
    pub hash: String,
    /// Identity of the parent node, absent for roots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_hash: Option<String>,
    /// The hashable message body.
    pub bucket: Bucket,
    /// Why the model stopped, for assistant nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    /// Token accounting, for assistant nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Project label the turn was captured under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl Node {
    /// Compute the canonical identity hash for a bucket under a parent.
    ///
    /// The hashed document is `{"content": <bucket>, "parent": <hash>}`
    /// where an absent parent serializes as the empty string, rendered
    /// with [`canonical_json`] and digested with SHA-256.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::Parse`] if the bucket cannot be serialized.
    pub fn compute_hash(parent: Option<&str>, bucket: &Bucket) -> Result<String, TapError> {
        let doc = json!({
            "parent": parent.unwrap_or(""),
            "content": serde_json::to_value(bucket)?,
        });
        let canon = canonical_json(&doc);
        let mut hasher = Sha256::new();
        hasher.update(canon.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Build a node from a parent link and a bucket, computing its hash.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::Parse`] if the bucket cannot be serialized.
    pub fn new(parent_hash: Option<String>, bucket: Bucket) -> Result<Self, TapError> {
        let hash = Self::compute_hash(parent_hash.as_deref(), &bucket)?;
        Ok(Self {
            hash,
            parent_hash,
            bucket,
            stop_reason: None,
            usage: None,
            project: None,
        })
    }

    /// Attach a stop reason.
    #[must_use]
    pub fn with_stop_reason(mut self, stop_reason: Option<String>) -> Self {
        self.stop_reason = stop_reason;
        self
    }

    /// Attach token usage.
    #[must_use]
    pub fn with_usage(mut self, usage: Option<TokenUsage>) -> Self {
        self.usage = usage;
        self
    }

    /// Attach a project label.
    #[must_use]
    pub fn with_project(mut self, project: Option<String>) -> Self {
        self.project = project;
        self
    }

    /// Returns `true` when this node has no parent.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_hash.is_none()
    }

    /// Verify that the stored hash matches the recomputed identity.
    #[must_use]
    pub fn verify_hash(&self) -> bool {
        match Self::compute_hash(self.parent_hash.as_deref(), &self.bucket) {
            Ok(computed) => computed == self.hash,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentBlock, Role};

    fn bucket(text: &str) -> Bucket {
        Bucket::message(
            Role::User,
            vec![ContentBlock::text(text)],
            "test-model",
            "ollama",
            None,
        )
    }

    #[test]
    fn hash_is_64_hex() {
        let h = Node::compute_hash(None, &bucket("hi")).unwrap();
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hash_is_deterministic() {
        let b = bucket("What is 2+2?");
        let h1 = Node::compute_hash(None, &b).unwrap();
        let h2 = Node::compute_hash(None, &b).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn parent_changes_hash() {
        let b = bucket("same text");
        let root = Node::compute_hash(None, &b).unwrap();
        let child = Node::compute_hash(Some(&root), &b).unwrap();
        assert_ne!(root, child);
    }

    #[test]
    fn metadata_does_not_change_hash() {
        let plain = Node::new(None, bucket("hello")).unwrap();
        let decorated = Node::new(None, bucket("hello"))
            .unwrap()
            .with_stop_reason(Some("stop".into()))
            .with_usage(Some(TokenUsage::counted(10, 5)))
            .with_project(Some("demo".into()));
        assert_eq!(plain.hash, decorated.hash);
    }

    #[test]
    fn bucket_field_changes_hash() {
        let a = Node::compute_hash(None, &bucket("a")).unwrap();
        let b = Node::compute_hash(None, &bucket("b")).unwrap();
        assert_ne!(a, b);

        let other_model = Bucket::message(
            Role::User,
            vec![ContentBlock::text("a")],
            "other-model",
            "ollama",
            None,
        );
        assert_ne!(a, Node::compute_hash(None, &other_model).unwrap());
    }

    #[test]
    fn verify_detects_tamper() {
        let mut node = Node::new(None, bucket("x")).unwrap();
        assert!(node.verify_hash());
        node.hash = "0".repeat(64);
        assert!(!node.verify_hash());
    }

    #[test]
    fn known_vector_is_pinned() {
        // Pins the canonical serialization so independent implementations
        // can cross-check: bucket fields sorted, parent as empty string.
        let b = bucket("hi");
        let doc = serde_json::json!({
            "parent": "",
            "content": serde_json::to_value(&b).unwrap(),
        });
        let canon = crate::canonical::canonical_json(&doc);
        assert!(canon.starts_with(r#"{"content":{"content":[{"text":"hi","type":"text"}],"#));
        assert!(canon.ends_with(r#""parent":""}"#));
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Embedding and vector-store capability seams.
//!
//! The worker pool and the search endpoint talk to these traits only;
//! real backends (a remote embedding service, an external vector
//! database) plug in behind them. [`MemoryVectorStore`] is the in-tree
//! reference store, and [`HashEmbedder`] is a deterministic embedder
//! used when no external service is configured — good enough for
//! exact-duplicate retrieval and for tests, not for semantics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tap_core::TapError;
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Turns text into a fixed-dimension embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text.
    ///
    /// # Errors
    ///
    /// [`TapError::CapabilityUnavailable`] or [`TapError::Upstream`]
    /// depending on the backend failure.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, TapError>;

    /// Embedding dimension this backend produces.
    fn dimension(&self) -> usize;

    /// Release backend resources.
    ///
    /// # Errors
    ///
    /// Backend-specific.
    async fn close(&self) -> Result<(), TapError> {
        Ok(())
    }
}

/// A document stored in the vector index, keyed by node hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorDoc {
    /// Document id; equals the node hash.
    pub id: String,
    /// Node hash the embedding belongs to.
    pub hash: String,
    /// The embedding vector.
    pub embedding: Vec<f32>,
}

/// A similarity match returned by [`VectorStore::query`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    /// Matched document id.
    pub id: String,
    /// Matched node hash.
    pub hash: String,
    /// Similarity score; higher is more similar.
    pub score: f32,
    /// The stored embedding, when the backend returns it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Stores embeddings keyed by node hash and answers similarity queries.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace documents.
    ///
    /// # Errors
    ///
    /// Backend-specific.
    async fn add(&self, docs: Vec<VectorDoc>) -> Result<(), TapError>;

    /// Return the `top_k` most similar documents, best first.
    ///
    /// # Errors
    ///
    /// Backend-specific.
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<VectorMatch>, TapError>;

    /// Fetch documents by id; absent ids are skipped.
    ///
    /// # Errors
    ///
    /// Backend-specific.
    async fn get(&self, ids: &[String]) -> Result<Vec<VectorDoc>, TapError>;

    /// Remove documents by id.
    ///
    /// # Errors
    ///
    /// Backend-specific.
    async fn delete(&self, ids: &[String]) -> Result<(), TapError>;

    /// Release backend resources.
    ///
    /// # Errors
    ///
    /// Backend-specific.
    async fn close(&self) -> Result<(), TapError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryVectorStore
// ---------------------------------------------------------------------------

/// Reference [`VectorStore`]: cosine similarity over an in-memory map.
#[derive(Default)]
pub struct MemoryVectorStore {
    docs: RwLock<HashMap<String, VectorDoc>>,
}

impl MemoryVectorStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    /// Returns `true` when no documents are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn add(&self, docs: Vec<VectorDoc>) -> Result<(), TapError> {
        let mut map = self.docs.write().await;
        for doc in docs {
            map.insert(doc.id.clone(), doc);
        }
        Ok(())
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<VectorMatch>, TapError> {
        let map = self.docs.read().await;
        let mut matches: Vec<VectorMatch> = map
            .values()
            .map(|doc| VectorMatch {
                id: doc.id.clone(),
                hash: doc.hash.clone(),
                score: cosine(embedding, &doc.embedding),
                embedding: None,
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn get(&self, ids: &[String]) -> Result<Vec<VectorDoc>, TapError> {
        let map = self.docs.read().await;
        Ok(ids.iter().filter_map(|id| map.get(id).cloned()).collect())
    }

    async fn delete(&self, ids: &[String]) -> Result<(), TapError> {
        let mut map = self.docs.write().await;
        for id in ids {
            map.remove(id);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HashEmbedder
// ---------------------------------------------------------------------------

/// Deterministic feature-hashing embedder.
///
/// Buckets character trigrams into `dimension` slots via SHA-256 and
/// L2-normalizes the result. Identical texts embed identically on every
/// platform, and near-duplicate texts land close, which is all the
/// default search path promises without a real embedding service.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// Create an embedder producing `dimension`-length vectors.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, TapError> {
        let mut vector = vec![0.0f32; self.dimension];
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        if chars.is_empty() {
            return Ok(vector);
        }
        let grams = chars.len().saturating_sub(2).max(1);
        for i in 0..grams {
            let gram: String = chars[i..(i + 3).min(chars.len())].iter().collect();
            let digest = Sha256::digest(gram.as_bytes());
            let slot = usize::from(digest[0]) << 8 | usize::from(digest[1]);
            let sign = if digest[2] & 1 == 0 { 1.0 } else { -1.0 };
            vector[slot % self.dimension] += sign;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

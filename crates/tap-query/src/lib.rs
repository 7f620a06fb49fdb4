// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Read-only query service over the conversation DAG.
//!
//! Exposes the store directly (stats, node lookup, per-leaf histories)
//! and a semantic search endpoint over the vector index. Everything here
//! is a read; the only writers are the persistence workers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tap_core::{ContentBlock, Node, Role, TapError, TokenUsage};
use tap_dag::DagStore;
use tap_index::{Embedder, VectorStore};
use tap_worker::WorkerPool;
use tracing::warn;

/// Longest preview string returned by search results.
const PREVIEW_CHARS: usize = 160;

/// Default number of search results.
const DEFAULT_TOP_K: usize = 10;

/// Shared state for the query router.
pub struct QueryState {
    /// The DAG store to read from.
    pub store: Arc<dyn DagStore>,
    /// Embedder for search queries, when configured.
    pub embedder: Option<Arc<dyn Embedder>>,
    /// Vector index, when configured.
    pub vectors: Option<Arc<dyn VectorStore>>,
    /// Worker pool whose counters surface in `/dag/stats`.
    pub pool: Option<Arc<WorkerPool>>,
}

/// API error with an HTTP status, rendered as `{"error": …}`.
#[derive(Debug)]
pub struct ApiError {
    /// Response status.
    pub status: StatusCode,
    /// Human-readable message.
    pub message: String,
}

impl ApiError {
    /// Build an error response.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<TapError> for ApiError {
    fn from(err: TapError) -> Self {
        let status = match &err {
            TapError::NotFound(_) => StatusCode::NOT_FOUND,
            TapError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            TapError::CapabilityUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            TapError::Upstream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

/// Build the query router.
pub fn router(state: Arc<QueryState>) -> Router {
    Router::new()
        .route("/ping", get(cmd_ping))
        .route("/dag/stats", get(cmd_stats))
        .route("/dag/node/{hash}", get(cmd_node))
        .route("/dag/history", get(cmd_all_histories))
        .route("/dag/history/{hash}", get(cmd_history))
        .route("/v1/search", get(cmd_search))
        .with_state(state)
}

async fn cmd_ping() -> &'static str {
    "pong"
}

#[derive(Debug, Serialize, Deserialize)]
struct QueueCounters {
    enqueued: u64,
    dropped: u64,
    processed: u64,
    failed: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct DagStats {
    total_nodes: usize,
    root_count: usize,
    leaf_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue: Option<QueueCounters>,
}

async fn cmd_stats(State(state): State<Arc<QueryState>>) -> Result<Json<DagStats>, ApiError> {
    let total_nodes = state.store.list()?.len();
    let root_count = state.store.roots()?.len();
    let leaf_count = state.store.leaves()?.len();
    let queue = state.pool.as_ref().map(|pool| {
        let stats = pool.stats();
        QueueCounters {
            enqueued: stats.enqueued,
            dropped: stats.dropped,
            processed: stats.processed,
            failed: stats.failed,
        }
    });
    Ok(Json(DagStats {
        total_nodes,
        root_count,
        leaf_count,
        queue,
    }))
}

async fn cmd_node(
    Path(hash): Path<String>,
    State(state): State<Arc<QueryState>>,
) -> Result<Json<Node>, ApiError> {
    Ok(Json(state.store.get(&hash)?))
}

#[derive(Debug, Serialize)]
struct HistoryMessage {
    hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_hash: Option<String>,
    role: Role,
    content: Vec<ContentBlock>,
    model: String,
    provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Serialize)]
struct History {
    messages: Vec<HistoryMessage>,
    head_hash: String,
    depth: usize,
}

fn build_history(store: &dyn DagStore, head: &str) -> Result<History, TapError> {
    let chain = store.ancestry(head)?;
    let depth = chain.len().saturating_sub(1);
    let messages = chain
        .into_iter()
        .rev()
        .map(|node| HistoryMessage {
            parent_hash: node.parent_hash,
            role: node.bucket.role,
            content: node.bucket.content,
            model: node.bucket.model,
            provider: node.bucket.provider,
            stop_reason: node.stop_reason,
            usage: node.usage,
            hash: node.hash,
        })
        .collect();
    Ok(History {
        messages,
        head_hash: head.to_string(),
        depth,
    })
}

async fn cmd_history(
    Path(hash): Path<String>,
    State(state): State<Arc<QueryState>>,
) -> Result<Json<History>, ApiError> {
    Ok(Json(build_history(state.store.as_ref(), &hash)?))
}

#[derive(Debug, Serialize)]
struct Histories {
    histories: Vec<History>,
    count: usize,
}

async fn cmd_all_histories(
    State(state): State<Arc<QueryState>>,
) -> Result<Json<Histories>, ApiError> {
    let mut histories = Vec::new();
    for leaf in state.store.leaves()? {
        match build_history(state.store.as_ref(), &leaf.hash) {
            Ok(history) => histories.push(history),
            // A leaf can race a half-written turn; skip it rather than
            // failing the whole listing.
            Err(err) => warn!(hash = %leaf.hash, error = %err, "skipping unreadable history"),
        }
    }
    let count = histories.len();
    Ok(Json(Histories { histories, count }))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: Option<String>,
    top_k: Option<i64>,
}

#[derive(Debug, Serialize)]
struct BranchEntry {
    hash: String,
    role: Role,
    text: String,
    matched: bool,
}

#[derive(Debug, Serialize)]
struct SearchResult {
    hash: String,
    score: f32,
    role: Role,
    preview: String,
    branch: Vec<BranchEntry>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    query: String,
    count: usize,
    results: Vec<SearchResult>,
}

async fn cmd_search(
    Query(params): Query<SearchParams>,
    State(state): State<Arc<QueryState>>,
) -> Result<Json<SearchResponse>, ApiError> {
    let query = params
        .query
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "missing query parameter"))?;
    let top_k = match params.top_k {
        None => DEFAULT_TOP_K,
        Some(k) if k >= 1 => usize::try_from(k)
            .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "invalid top_k"))?,
        Some(_) => {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "top_k must be a positive integer",
            ));
        }
    };
    let (Some(embedder), Some(vectors)) = (&state.embedder, &state.vectors) else {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "semantic search is not configured",
        ));
    };

    let embedding = embedder.embed(&query).await.map_err(|err| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("embed query: {err}"),
        )
    })?;
    let matches = vectors.query(&embedding, top_k).await.map_err(|err| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("vector query: {err}"),
        )
    })?;

    let mut results = Vec::new();
    for m in matches {
        // The index can be ahead of or behind the store; skip orphans.
        let Ok(node) = state.store.get(&m.hash) else {
            continue;
        };
        let branch = match state.store.ancestry(&m.hash) {
            Ok(chain) => chain
                .into_iter()
                .rev()
                .map(|n| BranchEntry {
                    matched: n.hash == m.hash,
                    role: n.bucket.role,
                    text: n.bucket.plain_text(),
                    hash: n.hash,
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        results.push(SearchResult {
            hash: m.hash,
            score: m.score,
            role: node.bucket.role,
            preview: preview(&node.bucket.plain_text()),
            branch,
        });
    }

    let count = results.len();
    Ok(Json(SearchResponse {
        query,
        count,
        results,
    }))
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_on_char_boundary() {
        let short = "hello";
        assert_eq!(preview(short), "hello");
        let long = "é".repeat(200);
        let p = preview(&long);
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 1);
        assert!(p.ends_with('…'));
    }

    #[test]
    fn api_error_maps_taxonomy() {
        let err: ApiError = TapError::NotFound("x".into()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let err: ApiError = TapError::Storage("x".into()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        let err: ApiError = TapError::CapabilityUnavailable("x".into()).into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query endpoint tests over a seeded store.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tap_core::{Bucket, ContentBlock, Node, Role, TokenUsage};
use tap_dag::{DagStore, MemoryStore};
use tap_index::{Embedder, HashEmbedder, MemoryVectorStore, VectorDoc, VectorStore};
use tap_query::QueryState;
use tower::ServiceExt;

fn node(role: Role, text: &str, parent: Option<&Node>) -> Node {
    let bucket = Bucket::message(
        role,
        vec![ContentBlock::text(text)],
        "m",
        "ollama",
        None,
    );
    Node::new(parent.map(|p| p.hash.clone()), bucket).unwrap()
}

fn empty_state() -> Arc<QueryState> {
    Arc::new(QueryState {
        store: Arc::new(MemoryStore::new()),
        embedder: Some(Arc::new(HashEmbedder::new(64))),
        vectors: Some(Arc::new(MemoryVectorStore::new())),
        pool: None,
    })
}

async fn get_json(router: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn ping_pongs() {
    let router = tap_query::router(empty_state());
    let response = router
        .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"pong");
}

#[tokio::test]
async fn stats_count_roots_and_leaves() {
    let store = Arc::new(MemoryStore::new());
    let user = node(Role::User, "q", None);
    let answer_a = node(Role::Assistant, "a1", Some(&user));
    let answer_b = node(Role::Assistant, "a2", Some(&user));
    for n in [&user, &answer_a, &answer_b] {
        store.put(n).unwrap();
    }
    let state = Arc::new(QueryState {
        store,
        embedder: None,
        vectors: None,
        pool: None,
    });

    let (status, body) = get_json(tap_query::router(state), "/dag/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_nodes"], 3);
    assert_eq!(body["root_count"], 1);
    assert_eq!(body["leaf_count"], 2);
}

#[tokio::test]
async fn node_endpoint_returns_404_for_missing() {
    let router = tap_query::router(empty_state());
    let (status, body) = get_json(router, &format!("/dag/node/{}", "0".repeat(64))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn history_is_oldest_first_with_usage() {
    let store = Arc::new(MemoryStore::new());
    let user = node(Role::User, "what is 2+2?", None);
    let answer = node(Role::Assistant, "4.", Some(&user))
        .with_stop_reason(Some("stop".into()))
        .with_usage(Some(TokenUsage::counted(10, 5)));
    store.put(&user).unwrap();
    store.put(&answer).unwrap();

    let state = Arc::new(QueryState {
        store,
        embedder: None,
        vectors: None,
        pool: None,
    });
    let router = tap_query::router(state);

    let (status, body) = get_json(router.clone(), &format!("/dag/history/{}", answer.hash)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["head_hash"], answer.hash.as_str());
    assert_eq!(body["depth"], 1);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["usage"]["total_tokens"], 15);

    let (status, body) = get_json(router, "/dag/history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["histories"][0]["head_hash"], answer.hash.as_str());
}

#[tokio::test]
async fn search_empty_store_returns_empty_results() {
    let router = tap_query::router(empty_state());
    let (status, body) = get_json(router, "/v1/search?query=hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["query"], "hello");
    assert_eq!(body["count"], 0);
    assert_eq!(body["results"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn search_validates_parameters() {
    let router = tap_query::router(empty_state());

    let (status, _) = get_json(router.clone(), "/v1/search").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get_json(router.clone(), "/v1/search?query=hello&top_k=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get_json(router, "/v1/search?query=hello&top_k=-3").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn search_without_capabilities_is_503() {
    let state = Arc::new(QueryState {
        store: Arc::new(MemoryStore::new()),
        embedder: None,
        vectors: None,
        pool: None,
    });
    let (status, body) = get_json(tap_query::router(state), "/v1/search?query=hello").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("not configured"));
}

#[tokio::test]
async fn search_returns_branch_with_match_flag() {
    let store = Arc::new(MemoryStore::new());
    let embedder = Arc::new(HashEmbedder::new(64));
    let vectors = Arc::new(MemoryVectorStore::new());

    let user = node(Role::User, "how do I bake bread?", None);
    let answer = node(Role::Assistant, "Use flour, water, salt, yeast.", Some(&user));
    store.put(&user).unwrap();
    store.put(&answer).unwrap();
    for n in [&user, &answer] {
        let embedding = embedder.embed(&n.bucket.plain_text()).await.unwrap();
        vectors
            .add(vec![VectorDoc {
                id: n.hash.clone(),
                hash: n.hash.clone(),
                embedding,
            }])
            .await
            .unwrap();
    }

    let state = Arc::new(QueryState {
        store,
        embedder: Some(embedder),
        vectors: Some(vectors),
        pool: None,
    });
    let (status, body) =
        get_json(tap_query::router(state), "/v1/search?query=bake%20bread&top_k=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    let result = &body["results"][0];
    assert_eq!(result["hash"], user.hash.as_str());
    let branch = result["branch"].as_array().unwrap();
    assert_eq!(branch.len(), 2);
    assert_eq!(branch[0]["matched"], true);
    assert_eq!(branch[1]["matched"], false);
}

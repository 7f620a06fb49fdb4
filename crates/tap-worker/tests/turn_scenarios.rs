// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end turn persistence scenarios driven through the pool.

use chrono::Utc;
use std::sync::Arc;
use tap_core::{ChatRequest, ChatResponse, Message, Role, TokenUsage};
use tap_dag::{DagStore, DagView, MemoryStore};
use tap_worker::{Job, PoolConfig, WorkerPool};

fn request(messages: Vec<Message>) -> ChatRequest {
    ChatRequest {
        model: "m".into(),
        messages,
        ..ChatRequest::default()
    }
}

fn response(text: &str, usage: Option<TokenUsage>) -> ChatResponse {
    ChatResponse {
        model: "m".into(),
        created_at: None,
        message: Message::text(Role::Assistant, text),
        done: true,
        stop_reason: Some("stop".into()),
        usage,
        extra: serde_json::Map::new(),
    }
}

fn job(messages: Vec<Message>, resp: ChatResponse) -> Job {
    Job {
        provider: "ollama".into(),
        agent_name: None,
        project: None,
        request: request(messages),
        response: resp,
        started_at: Utc::now(),
        completed_at: Utc::now(),
        streaming: false,
        http_status: 200,
    }
}

/// Scenario: a single non-streaming turn lands as a two-node chain with
/// usage on the assistant node.
#[tokio::test]
async fn single_turn_persists_two_nodes() {
    let store = Arc::new(MemoryStore::new());
    let pool = WorkerPool::new(store.clone(), None, None, PoolConfig::default());

    assert!(pool.enqueue(job(
        vec![Message::text(Role::User, "What is 2+2?")],
        response("4.", Some(TokenUsage::counted(10, 5))),
    )));
    pool.close().await;

    assert_eq!(store.list().unwrap().len(), 2);
    let leaves = store.leaves().unwrap();
    assert_eq!(leaves.len(), 1);
    let leaf = &leaves[0];
    assert_eq!(leaf.bucket.role, Role::Assistant);

    let chain = store.ancestry(&leaf.hash).unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0].bucket.role, Role::Assistant);
    assert_eq!(chain[1].bucket.role, Role::User);
    assert_eq!(leaf.usage.unwrap().total_tokens, 15);
    assert_eq!(pool.stats().processed, 1);
}

/// Scenario: a second turn replaying the first turn's prefix dedups onto
/// the existing chain — five nodes, not seven.
#[tokio::test]
async fn replayed_prefix_deduplicates() {
    let store = Arc::new(MemoryStore::new());
    let pool = WorkerPool::new(store.clone(), None, None, PoolConfig::default());

    let system = Message::text(Role::System, "be terse");
    let user_one = Message::text(Role::User, "first question");
    let assistant_one = Message::text(Role::Assistant, "first answer");
    let user_two = Message::text(Role::User, "second question");

    assert!(pool.enqueue(job(
        vec![system.clone(), user_one.clone()],
        response("first answer", None),
    )));
    assert!(pool.enqueue(job(
        vec![system, user_one, assistant_one, user_two],
        response("second answer", None),
    )));
    pool.close().await;

    assert_eq!(store.list().unwrap().len(), 5);
    let leaves = store.leaves().unwrap();
    assert_eq!(leaves.len(), 1);

    let texts: Vec<String> = store
        .ancestry(&leaves[0].hash)
        .unwrap()
        .iter()
        .map(|n| n.bucket.plain_text())
        .collect();
    assert_eq!(
        texts,
        vec![
            "second answer",
            "second question",
            "first answer",
            "first question",
            "be terse",
        ]
    );
}

/// Scenario: the same prompt answered differently in two turns branches
/// at the user node.
#[tokio::test]
async fn divergent_answers_branch() {
    let store = Arc::new(MemoryStore::new());
    let pool = WorkerPool::new(store.clone(), None, None, PoolConfig::default());

    let prompt = vec![Message::text(Role::User, "tell me a joke")];
    assert!(pool.enqueue(job(prompt.clone(), response("joke one", None))));
    assert!(pool.enqueue(job(prompt, response("joke two", None))));
    pool.close().await;

    assert_eq!(store.list().unwrap().len(), 3);
    let leaves = store.leaves().unwrap();
    assert_eq!(leaves.len(), 2);
    assert_eq!(leaves[0].parent_hash, leaves[1].parent_hash);

    let user_hash = leaves[0].parent_hash.clone().unwrap();
    let view = DagView::load(store.as_ref(), &leaves[0].hash).unwrap();
    assert!(view.is_branching(&user_hash));
}

/// Overlapping prefixes persist correctly regardless of worker
/// interleaving: many replays of the same chain still produce one chain.
#[tokio::test]
async fn concurrent_replays_converge() {
    let store = Arc::new(MemoryStore::new());
    let pool = WorkerPool::new(
        store.clone(),
        None,
        None,
        PoolConfig {
            queue_size: 64,
            workers: 4,
        },
    );

    for _ in 0..16 {
        assert!(pool.enqueue(job(
            vec![Message::text(Role::User, "same prompt")],
            response("same answer", None),
        )));
    }
    pool.close().await;

    assert_eq!(store.list().unwrap().len(), 2);
    assert_eq!(pool.stats().processed, 16);
}

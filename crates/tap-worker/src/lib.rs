// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Persistence worker pool.
//!
//! Completed turns arrive as [`Job`]s on a bounded queue. A fixed set of
//! workers walks each turn into the DAG store — prompt messages in order,
//! then the assistant response, each node linked to the previous one —
//! and then, best-effort, embeds and indexes the nodes that were actually
//! new. Enqueueing never blocks: a full queue drops the job and bumps a
//! counter, because the proxy hot path must never wait on storage.
//!
//! Delivery is at-least-once across overlapping turns; idempotent `put`
//! plus content addressing make the replays harmless.

use async_channel::{Receiver, Sender, TrySendError};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tap_core::{Bucket, ChatRequest, ChatResponse, Node, TapError};
use tap_dag::DagStore;
use tap_index::{Embedder, VectorDoc, VectorStore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// One completed request/response turn, ready to persist.
#[derive(Debug, Clone)]
pub struct Job {
    /// Provider family the turn was parsed with.
    pub provider: String,
    /// Agent identity the traffic was routed under, if any.
    pub agent_name: Option<String>,
    /// Project label to stamp on the response node.
    pub project: Option<String>,
    /// The parsed request.
    pub request: ChatRequest,
    /// The parsed (or reconstructed) response.
    pub response: ChatResponse,
    /// When the proxy received the request.
    pub started_at: DateTime<Utc>,
    /// When the upstream response completed.
    pub completed_at: DateTime<Utc>,
    /// Whether the response was streamed.
    pub streaming: bool,
    /// Upstream HTTP status.
    pub http_status: u16,
}

/// Pool sizing knobs.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Bounded queue capacity.
    pub queue_size: usize,
    /// Number of worker tasks.
    pub workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            queue_size: 256,
            workers: 3,
        }
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Jobs accepted onto the queue.
    pub enqueued: u64,
    /// Jobs rejected because the queue was full or closed.
    pub dropped: u64,
    /// Jobs fully persisted.
    pub processed: u64,
    /// Jobs aborted by a storage error or a panic.
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

struct WorkerCtx {
    store: Arc<dyn DagStore>,
    embedder: Option<Arc<dyn Embedder>>,
    vectors: Option<Arc<dyn VectorStore>>,
    counters: Arc<Counters>,
}

/// Bounded-queue consumer that persists turns and indexes embeddings.
pub struct WorkerPool {
    tx: Sender<Job>,
    // Kept so the channel stays open even while no worker holds a clone.
    rx: Receiver<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    /// Spawn a pool. Embedding is skipped when either capability is absent.
    #[must_use]
    pub fn new(
        store: Arc<dyn DagStore>,
        embedder: Option<Arc<dyn Embedder>>,
        vectors: Option<Arc<dyn VectorStore>>,
        config: PoolConfig,
    ) -> Self {
        let (tx, rx) = async_channel::bounded(config.queue_size.max(1));
        let counters = Arc::new(Counters::default());
        let mut workers = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let ctx = WorkerCtx {
                store: store.clone(),
                embedder: embedder.clone(),
                vectors: vectors.clone(),
                counters: counters.clone(),
            };
            workers.push(tokio::spawn(worker_loop(index, rx.clone(), ctx)));
        }
        Self {
            tx,
            rx,
            workers: Mutex::new(workers),
            counters,
        }
    }

    /// Number of jobs currently waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    /// Offer a job to the queue without blocking.
    ///
    /// Returns `false` when the queue is full or the pool is closed; the
    /// job is dropped and counted.
    pub fn enqueue(&self, job: Job) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("persistence queue full, dropping turn");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("persistence pool closed, dropping turn");
                false
            }
        }
    }

    /// Close the queue and wait for the workers to drain it.
    ///
    /// After this returns, [`enqueue`](Self::enqueue) returns `false`.
    /// Idempotent.
    pub async fn close(&self) {
        self.tx.close();
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().expect("pool lock poisoned");
            workers.drain(..).collect()
        };
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "worker task join failed");
            }
        }
        let stats = self.stats();
        debug!(
            enqueued = stats.enqueued,
            dropped = stats.dropped,
            processed = stats.processed,
            failed = stats.failed,
            "worker pool drained"
        );
    }

    /// Current counter snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

async fn worker_loop(index: usize, rx: Receiver<Job>, ctx: WorkerCtx) {
    while let Ok(job) = rx.recv().await {
        let outcome = AssertUnwindSafe(process_job(&ctx, job)).catch_unwind().await;
        match outcome {
            Ok(Ok(new_nodes)) => {
                ctx.counters.processed.fetch_add(1, Ordering::Relaxed);
                debug!(worker = index, new_nodes, "turn persisted");
            }
            Ok(Err(err)) => {
                ctx.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(worker = index, error = %err, "turn persistence aborted");
            }
            Err(_) => {
                // A panicking job must not take the worker down with it.
                ctx.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(worker = index, "panic while persisting turn");
            }
        }
    }
}

/// Walk one turn into the DAG, then index whatever was new.
async fn process_job(ctx: &WorkerCtx, job: Job) -> Result<usize, TapError> {
    let mut parent: Option<String> = None;
    let mut new_nodes: Vec<Node> = Vec::new();

    for message in &job.request.messages {
        let bucket = Bucket::from_message(
            message,
            &job.request.model,
            &job.provider,
            job.agent_name.clone(),
        );
        let node = Node::new(parent.clone(), bucket)?;
        if ctx.store.put(&node)? {
            new_nodes.push(node.clone());
        }
        parent = Some(node.hash);
    }

    let response_bucket = Bucket::from_message(
        &job.response.message,
        &job.request.model,
        &job.provider,
        job.agent_name.clone(),
    );
    let response_node = Node::new(parent, response_bucket)?
        .with_stop_reason(job.response.stop_reason.clone())
        .with_usage(job.response.usage)
        .with_project(job.project.clone());
    if ctx.store.put(&response_node)? {
        new_nodes.push(response_node);
    }

    let inserted = new_nodes.len();
    index_nodes(ctx, new_nodes).await;
    Ok(inserted)
}

/// Best-effort embedding of freshly inserted nodes. Failures are logged
/// per node and never fail the job.
async fn index_nodes(ctx: &WorkerCtx, nodes: Vec<Node>) {
    let (Some(embedder), Some(vectors)) = (&ctx.embedder, &ctx.vectors) else {
        return;
    };
    for node in nodes {
        let text = node.bucket.plain_text();
        if text.is_empty() {
            continue;
        }
        let embedding = match embedder.embed(&text).await {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!(hash = %node.hash, error = %err, "embedding failed");
                continue;
            }
        };
        let doc = VectorDoc {
            id: node.hash.clone(),
            hash: node.hash.clone(),
            embedding,
        };
        if let Err(err) = vectors.add(vec![doc]).await {
            warn!(hash = %node.hash, error = %err, "vector index add failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tap_core::{Message, Role, TokenUsage};
    use tap_dag::MemoryStore;

    fn job(user_text: &str, assistant_text: &str) -> Job {
        Job {
            provider: "ollama".into(),
            agent_name: None,
            project: None,
            request: ChatRequest {
                model: "m".into(),
                messages: vec![Message::text(Role::User, user_text)],
                ..ChatRequest::default()
            },
            response: ChatResponse {
                model: "m".into(),
                created_at: None,
                message: Message::text(Role::Assistant, assistant_text),
                done: true,
                stop_reason: Some("stop".into()),
                usage: Some(TokenUsage::counted(10, 5)),
                extra: serde_json::Map::new(),
            },
            started_at: Utc::now(),
            completed_at: Utc::now(),
            streaming: false,
            http_status: 200,
        }
    }

    #[tokio::test]
    async fn enqueue_after_close_is_rejected() {
        let store: Arc<dyn DagStore> = Arc::new(MemoryStore::new());
        let pool = WorkerPool::new(store, None, None, PoolConfig::default());
        pool.close().await;
        assert!(!pool.enqueue(job("q", "a")));
        assert_eq!(pool.stats().dropped, 1);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let store: Arc<dyn DagStore> = Arc::new(MemoryStore::new());
        // No workers: nothing drains the queue.
        let pool = WorkerPool::new(
            store,
            None,
            None,
            PoolConfig {
                queue_size: 1,
                workers: 0,
            },
        );
        assert!(pool.enqueue(job("first", "a")));
        assert!(!pool.enqueue(job("second", "b")));
        let stats = pool.stats();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.dropped, 1);
        pool.close().await;
    }

    struct FailingStore;
    impl DagStore for FailingStore {
        fn put(&self, _node: &Node) -> Result<bool, TapError> {
            Err(TapError::Storage("disk on fire".into()))
        }
        fn get(&self, hash: &str) -> Result<Node, TapError> {
            Err(TapError::NotFound(hash.to_string()))
        }
        fn has(&self, _hash: &str) -> Result<bool, TapError> {
            Ok(false)
        }
        fn children_of(&self, _parent: Option<&str>) -> Result<Vec<Node>, TapError> {
            Ok(Vec::new())
        }
        fn list(&self) -> Result<Vec<Node>, TapError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn storage_error_fails_job_not_worker() {
        let store: Arc<dyn DagStore> = Arc::new(FailingStore);
        let pool = WorkerPool::new(
            store,
            None,
            None,
            PoolConfig {
                queue_size: 8,
                workers: 1,
            },
        );
        assert!(pool.enqueue(job("q1", "a1")));
        assert!(pool.enqueue(job("q2", "a2")));
        pool.close().await;
        let stats = pool.stats();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.processed, 0);
    }

    struct PanickyStore;
    impl DagStore for PanickyStore {
        fn put(&self, _node: &Node) -> Result<bool, TapError> {
            panic!("boom");
        }
        fn get(&self, hash: &str) -> Result<Node, TapError> {
            Err(TapError::NotFound(hash.to_string()))
        }
        fn has(&self, _hash: &str) -> Result<bool, TapError> {
            Ok(false)
        }
        fn children_of(&self, _parent: Option<&str>) -> Result<Vec<Node>, TapError> {
            Ok(Vec::new())
        }
        fn list(&self) -> Result<Vec<Node>, TapError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn panic_is_recovered_and_counted() {
        let store: Arc<dyn DagStore> = Arc::new(PanickyStore);
        let pool = WorkerPool::new(
            store,
            None,
            None,
            PoolConfig {
                queue_size: 8,
                workers: 1,
            },
        );
        assert!(pool.enqueue(job("q1", "a1")));
        assert!(pool.enqueue(job("q2", "a2")));
        pool.close().await;
        assert_eq!(pool.stats().failed, 2);
    }
}

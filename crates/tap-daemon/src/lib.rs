// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Component wiring for the llm-tap daemon.
//!
//! Construction and teardown are explicit and ordered: the DAG store
//! comes up first and goes down last, the worker pool drains before the
//! stores it writes to close, and every component receives its
//! dependencies — no ambient singletons.

use std::sync::Arc;
use tap_config::{Config, StorageBackend};
use tap_core::TapError;
use tap_dag::{DagStore, MemoryStore, SqliteStore};
use tap_index::{Embedder, HashEmbedder, MemoryVectorStore, VectorStore};
use tap_proxy::{AgentRoute, ProxyConfig, ProxyState};
use tap_query::QueryState;
use tap_worker::{PoolConfig, WorkerPool};
use tracing::{info, warn};

/// The daemon's long-lived components, constructed from a [`Config`].
pub struct Components {
    /// The DAG store.
    pub store: Arc<dyn DagStore>,
    /// Embedder, when search is enabled.
    pub embedder: Option<Arc<dyn Embedder>>,
    /// Vector index, when search is enabled.
    pub vectors: Option<Arc<dyn VectorStore>>,
    /// Persistence worker pool.
    pub pool: Arc<WorkerPool>,
    /// Proxy front-end router.
    pub proxy_router: axum::Router,
    /// Query service router.
    pub query_router: axum::Router,
}

/// Build every component from a validated config.
///
/// # Errors
///
/// [`TapError::Storage`] when the store cannot be opened,
/// [`TapError::Upstream`] when the HTTP client cannot be built.
pub fn build(config: &Config) -> Result<Components, TapError> {
    let store: Arc<dyn DagStore> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Sqlite => {
            let path = config.storage.path.as_deref().unwrap_or("tap.sqlite");
            info!(path, "opening sqlite dag store");
            Arc::new(SqliteStore::open(path)?)
        }
    };

    let (embedder, vectors): (Option<Arc<dyn Embedder>>, Option<Arc<dyn VectorStore>>) =
        if config.search.enabled {
            info!(dimension = config.search.dimension, "search enabled");
            (
                Some(Arc::new(HashEmbedder::new(config.search.dimension))),
                Some(Arc::new(MemoryVectorStore::new())),
            )
        } else {
            (None, None)
        };

    let pool = Arc::new(WorkerPool::new(
        store.clone(),
        embedder.clone(),
        vectors.clone(),
        PoolConfig {
            queue_size: config.queue.size,
            workers: config.queue.workers,
        },
    ));

    let proxy_config = ProxyConfig {
        upstream: config.proxy.upstream.clone(),
        provider: config.proxy.provider.clone(),
        agents: config
            .agents
            .iter()
            .map(|(name, agent)| {
                (
                    name.clone(),
                    AgentRoute {
                        provider: agent.provider.clone(),
                        upstream: agent.upstream.clone(),
                    },
                )
            })
            .collect(),
        project: config.project.clone(),
    };
    let proxy_state = Arc::new(ProxyState::new(proxy_config, pool.clone())?);
    let proxy_router = tap_proxy::router(proxy_state);

    let query_state = Arc::new(QueryState {
        store: store.clone(),
        embedder: embedder.clone(),
        vectors: vectors.clone(),
        pool: Some(pool.clone()),
    });
    let query_router = tap_query::router(query_state);

    Ok(Components {
        store,
        embedder,
        vectors,
        pool,
        proxy_router,
        query_router,
    })
}

/// Tear down in reverse dependency order: drain the pool, close the
/// index capabilities, close the store last.
pub async fn teardown(components: Components) {
    components.pool.close().await;
    if let Some(embedder) = &components.embedder
        && let Err(err) = embedder.close().await
    {
        warn!(error = %err, "embedder close failed");
    }
    if let Some(vectors) = &components.vectors
        && let Err(err) = vectors.close().await
    {
        warn!(error = %err, "vector store close failed");
    }
    if let Err(err) = components.store.close() {
        warn!(error = %err, "dag store close failed");
    }
    info!("daemon components shut down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_and_tears_down_default_config() {
        let config = Config::default();
        let components = build(&config).unwrap();
        assert!(components.embedder.is_none());
        assert!(components.vectors.is_none());
        teardown(components).await;
    }

    #[tokio::test]
    async fn search_enabled_wires_capabilities() {
        let mut config = Config::default();
        config.search.enabled = true;
        let components = build(&config).unwrap();
        assert!(components.embedder.is_some());
        assert!(components.vectors.is_some());
        teardown(components).await;
    }

    #[tokio::test]
    async fn pool_rejects_after_teardown() {
        let config = Config::default();
        let components = build(&config).unwrap();
        let pool = components.pool.clone();
        teardown(components).await;
        assert_eq!(pool.stats().enqueued, 0);
    }
}

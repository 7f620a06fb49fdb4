// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Transparent forwarding front-end.
//!
//! Every request that reaches the proxy port is routed to an upstream
//! LLM endpoint and forwarded with hop-by-hop headers filtered. Chat
//! requests the selected provider can parse are additionally captured:
//! non-streaming responses are parsed whole, streaming responses are
//! teed byte-for-byte to the client while events accumulate on the side,
//! and each completed turn is handed to the persistence pool. Capture is
//! strictly best-effort — no storage, parse, or indexing failure is ever
//! visible to the client.

mod forward;
mod headers;
mod route;

pub use headers::{filter_request_headers, filter_response_headers};
pub use route::{RouteDecision, resolve_route};

use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tap_core::TapError;
use tap_providers::Provider;
use tap_worker::WorkerPool;

/// Name of the header that selects an agent route. Stripped before
/// forwarding.
pub const AGENT_NAME_HEADER: &str = "agent-name";

/// Ceiling on buffered request bodies.
pub(crate) const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Total-time ceiling for non-streaming upstream calls.
pub(crate) const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// A named agent's forwarding target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRoute {
    /// Provider family used to parse this agent's traffic.
    pub provider: String,
    /// Upstream base URL.
    pub upstream: String,
}

/// Static forwarding configuration.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    /// Default upstream base URL.
    pub upstream: String,
    /// Default provider family.
    pub provider: String,
    /// Named agent routes.
    pub agents: HashMap<String, AgentRoute>,
    /// Project label stamped on captured turns.
    pub project: Option<String>,
}

/// Shared state for the forwarder.
pub struct ProxyState {
    pub(crate) client: reqwest::Client,
    pub(crate) config: ProxyConfig,
    pub(crate) providers: HashMap<String, Arc<dyn Provider>>,
    pub(crate) pool: Arc<WorkerPool>,
}

impl ProxyState {
    /// Build proxy state with the built-in provider registry.
    ///
    /// # Errors
    ///
    /// [`TapError::Upstream`] when the HTTP client cannot be constructed.
    pub fn new(config: ProxyConfig, pool: Arc<WorkerPool>) -> Result<Self, TapError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TapError::Upstream(format!("build http client: {e}")))?;
        Ok(Self {
            client,
            config,
            providers: tap_providers::registry(),
            pool,
        })
    }

    /// The persistence pool this proxy feeds.
    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }
}

/// Build the forwarding router: every method, every path.
pub fn router(state: Arc<ProxyState>) -> Router {
    Router::new().fallback(forward::forward).with_state(state)
}

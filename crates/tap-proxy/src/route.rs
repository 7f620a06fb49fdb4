// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request routing: agent scoping and provider overrides.

use crate::{AGENT_NAME_HEADER, ProxyConfig};
use axum::http::HeaderMap;

/// The outcome of routing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    /// Provider family to parse this traffic with.
    pub provider: String,
    /// Upstream base URL.
    pub upstream: String,
    /// Agent the traffic was attributed to, if any.
    pub agent_name: Option<String>,
    /// Path to forward, with routing segments stripped.
    pub path: String,
}

/// Resolve `(provider, upstream, agent)` for a request.
///
/// An `Agent-Name` header or an `/agents/<name>/…` path prefix selects an
/// agent route; inside an agent path a `/providers/<name>/…` infix
/// overrides the provider explicitly. An agent without a configured
/// route falls back to the default upstream but keeps its attribution.
#[must_use]
pub fn resolve_route(config: &ProxyConfig, headers: &HeaderMap, path: &str) -> RouteDecision {
    let mut agent_name = headers
        .get(AGENT_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let mut path = path.to_string();

    if agent_name.is_none()
        && let Some(rest) = path.strip_prefix("/agents/")
    {
        match rest.split_once('/') {
            Some((name, remainder)) if !name.is_empty() => {
                agent_name = Some(name.to_string());
                path = format!("/{remainder}");
            }
            None if !rest.is_empty() => {
                agent_name = Some(rest.to_string());
                path = "/".to_string();
            }
            _ => {}
        }
    }

    let (mut provider, upstream) = match agent_name
        .as_deref()
        .and_then(|name| config.agents.get(name))
    {
        Some(route) => (route.provider.clone(), route.upstream.clone()),
        None => (config.provider.clone(), config.upstream.clone()),
    };

    if agent_name.is_some()
        && let Some(rest) = path.strip_prefix("/providers/")
        && let Some((name, remainder)) = rest.split_once('/')
        && !name.is_empty()
    {
        provider = name.to_string();
        path = format!("/{remainder}");
    }

    RouteDecision {
        provider,
        upstream,
        agent_name,
        path,
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Configuration loading, validation, and advisory warnings.
//!
//! Settings load from a TOML file (default `tap.toml`, overridable via
//! the `TAP_CONFIG` environment variable or `--config`), with CLI flags
//! layered on top by the daemon. [`Config::validate`] rejects
//! configurations that cannot work; [`Config::warnings`] surfaces
//! advisory issues that deserve a log line but not a refusal to start.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TAP_CONFIG";

/// Default config file path.
pub const DEFAULT_CONFIG_PATH: &str = "tap.toml";

/// Provider names the daemon can wire up.
const KNOWN_PROVIDERS: [&str; 3] = ["anthropic", "ollama", "openai"];

/// Errors from configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be read.
    #[error("failed to read config {path}: {reason}")]
    Io {
        /// Path that was requested.
        path: String,
        /// Underlying I/O failure.
        reason: String,
    },

    /// The file could not be parsed as TOML.
    #[error("failed to parse config: {reason}")]
    Parse {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed.
    #[error("config validation failed: {reasons:?}")]
    Validation {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Advisory issues that do not prevent startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Search is enabled over a purely in-memory store; the index will
    /// not survive a restart.
    EphemeralSearchIndex,
    /// Queue capacity is smaller than the worker count.
    QueueSmallerThanWorkers {
        /// Configured queue size.
        queue: usize,
        /// Configured worker count.
        workers: usize,
    },
    /// An agent route points at the default upstream; the route is
    /// redundant.
    RedundantAgentRoute {
        /// Agent name.
        agent: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EphemeralSearchIndex => {
                write!(f, "search enabled with memory storage: index is lost on restart")
            }
            Self::QueueSmallerThanWorkers { queue, workers } => {
                write!(f, "queue size {queue} is smaller than worker count {workers}")
            }
            Self::RedundantAgentRoute { agent } => {
                write!(f, "agent route '{agent}' duplicates the default upstream")
            }
        }
    }
}

/// Storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Ephemeral in-memory store.
    Memory,
    /// Durable SQLite store.
    Sqlite,
}

/// `[proxy]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    /// Proxy bind address.
    pub listen: String,
    /// Default upstream base URL.
    pub upstream: String,
    /// Default provider family.
    pub provider: String,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            upstream: "http://127.0.0.1:11434".to_string(),
            provider: "ollama".to_string(),
        }
    }
}

/// `[query]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySection {
    /// Query-service bind address.
    pub listen: String,
}

impl Default for QuerySection {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8081".to_string(),
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Selected backend.
    pub backend: StorageBackend,
    /// Database path, required for sqlite.
    pub path: Option<String>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: None,
        }
    }
}

/// `[queue]` section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    /// Bounded queue capacity.
    pub size: usize,
    /// Worker task count.
    pub workers: usize,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            size: 256,
            workers: 3,
        }
    }
}

/// `[search]` section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    /// Whether to wire the embedder + vector index.
    pub enabled: bool,
    /// Embedding dimension.
    pub dimension: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            enabled: false,
            dimension: 384,
        }
    }
}

/// One `[agents.<name>]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Provider family for this agent.
    pub provider: String,
    /// Upstream base URL for this agent.
    pub upstream: String,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Proxy front-end settings.
    pub proxy: ProxySection,
    /// Query service settings.
    pub query: QuerySection,
    /// DAG storage settings.
    pub storage: StorageSection,
    /// Worker pool sizing.
    pub queue: QueueSection,
    /// Semantic search settings.
    pub search: SearchSection,
    /// Named agent routes.
    pub agents: BTreeMap<String, AgentSection>,
    /// Project label stamped on captured turns.
    pub project: Option<String>,
}

impl Config {
    /// Load and validate a config file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::FileNotFound`], [`ConfigError::Io`],
    /// [`ConfigError::Parse`], or [`ConfigError::Validation`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config = Self::parse(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without validating.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] on malformed TOML.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    /// Semantic validation.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Validation`] collecting every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut reasons = Vec::new();

        if self.proxy.listen.parse::<SocketAddr>().is_err() {
            reasons.push(format!("proxy.listen is not a socket address: {}", self.proxy.listen));
        }
        if self.query.listen.parse::<SocketAddr>().is_err() {
            reasons.push(format!("query.listen is not a socket address: {}", self.query.listen));
        }
        if self.proxy.upstream.is_empty() {
            reasons.push("proxy.upstream must not be empty".to_string());
        }
        if !KNOWN_PROVIDERS.contains(&self.proxy.provider.as_str()) {
            reasons.push(format!("unknown provider: {}", self.proxy.provider));
        }
        for (name, agent) in &self.agents {
            if !KNOWN_PROVIDERS.contains(&agent.provider.as_str()) {
                reasons.push(format!("agent '{name}' has unknown provider: {}", agent.provider));
            }
            if agent.upstream.is_empty() {
                reasons.push(format!("agent '{name}' has an empty upstream"));
            }
        }
        if self.queue.size == 0 {
            reasons.push("queue.size must be at least 1".to_string());
        }
        if self.queue.workers == 0 {
            reasons.push("queue.workers must be at least 1".to_string());
        }
        if self.storage.backend == StorageBackend::Sqlite
            && self.storage.path.as_deref().unwrap_or("").is_empty()
        {
            reasons.push("storage.path is required for the sqlite backend".to_string());
        }
        if self.search.enabled && self.search.dimension == 0 {
            reasons.push("search.dimension must be at least 1".to_string());
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation { reasons })
        }
    }

    /// Advisory warnings for a valid configuration.
    #[must_use]
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut out = Vec::new();
        if self.search.enabled && self.storage.backend == StorageBackend::Memory {
            out.push(ConfigWarning::EphemeralSearchIndex);
        }
        if self.queue.size < self.queue.workers {
            out.push(ConfigWarning::QueueSmallerThanWorkers {
                queue: self.queue.size,
                workers: self.queue.workers,
            });
        }
        for (name, agent) in &self.agents {
            if agent.upstream == self.proxy.upstream && agent.provider == self.proxy.provider {
                out.push(ConfigWarning::RedundantAgentRoute {
                    agent: name.clone(),
                });
            }
        }
        out
    }
}

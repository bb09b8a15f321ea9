// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Conexus - local code-intelligence engine.
//!
//! Continuously indexes a project tree into a chunked, vector-plus-
//! lexical searchable corpus and serves low-latency context queries over
//! JSON-RPC.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - core domain types (`Document`, `ChunkType`, `CancelToken`)
//! - [`error`] - error types and result aliases
//! - [`config`] - configuration loading and validation
//! - [`telemetry`] - tracing, metrics, and observability infrastructure
//! - [`index`] - walker, change detection, chunker, and the indexing
//!   controller state machine
//! - [`embeddings`] - embedding providers and the LRU cache
//! - [`store`] - SQLite document/vector/FTS5 store with hybrid search
//! - [`connectors`] - external source contract and registry
//! - [`safety`] - path validation and rate limiting
//! - [`engine`] - the façade tying store, indexer, and connectors together
//! - [`server`] - JSON-RPC 2.0 dispatch and the stdio transport
//!
//! # Example
//!
//! ```rust,ignore
//! use conexus::config::Config;
//! use conexus::engine::{ContextEngine, SearchRequest};
//!
//! let engine = ContextEngine::new(Config::default()).await?;
//! engine.controller().start(Default::default())?;
//! engine.controller().wait_until_idle().await;
//!
//! let response = engine.search(SearchRequest {
//!     query: "payment gateway implementation".to_string(),
//!     top_k: 20,
//!     offset: 0,
//!     filters: Default::default(),
//!     boosts: Default::default(),
//!     deadline: None,
//! }).await?;
//! ```

pub mod config;
pub mod connectors;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod index;
pub mod safety;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod types;

// Re-export commonly used types at crate root
pub use engine::{ContextEngine, SearchRequest, SearchResponse};
pub use error::{
    ConfigError, ConnectorError, EmbedError, EngineError, IndexError, Result, StoreError,
};
pub use types::{CancelToken, ChunkType, Document};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

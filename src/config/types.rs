// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! Every option has an explicit documented default; there are no
//! "missing means default" sentinels beyond serde filling absent fields
//! from these defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub indexer: IndexerConfig,
    pub search: SearchConfig,
    pub embedding: EmbeddingConfig,
    pub server: ServerConfig,
}

/// Store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path of the single-file embedded database.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/db.sqlite"),
        }
    }
}

/// Walker, chunker, and pipeline options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Root of the tree to index.
    pub root_path: PathBuf,
    /// Files larger than this are skipped.
    pub max_file_size_bytes: u64,
    /// Gitignore-style patterns; `.git` is always included and a root
    /// `.gitignore` is appended when present.
    pub ignore_patterns: Vec<String>,
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between windowed chunks in characters.
    pub chunk_overlap: usize,
    /// Number of parallel chunking workers.
    pub workers: usize,
    /// Documents per persisted batch.
    pub batch_size: usize,
    /// Maximum time between checkpoints.
    pub checkpoint_interval_ms: u64,
    /// How long `stop` waits for a clean shutdown before aborting.
    pub stop_grace_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("."),
            max_file_size_bytes: 1024 * 1024,
            ignore_patterns: vec![".git".to_string()],
            chunk_size: 2000,
            chunk_overlap: 200,
            workers: 4,
            batch_size: 100,
            checkpoint_interval_ms: 500,
            stop_grace_ms: 10_000,
        }
    }
}

/// Retrieval parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Default number of results per query.
    pub default_top_k: usize,
    /// Upper bound on `top_k`.
    pub max_top_k: usize,
    /// Sample size multiplier for approximate vector search.
    pub sample_multiplier: usize,
    /// Minimum candidate sample size.
    pub min_sample: usize,
    /// Heap-min / theoretical-max ratio that stops the scan early.
    pub early_termination_ratio: f32,
    /// Documents scored per scan batch.
    pub scan_batch_size: usize,
    /// Per-ranker candidate list cutoff for fusion.
    pub candidate_cutoff: usize,
    /// RRF rank constant.
    pub rrf_k: f32,
    /// RRF weight of the vector ranking.
    pub rrf_weight_vector: f32,
    /// RRF weight of the BM25 ranking.
    pub rrf_weight_bm25: f32,
    /// Score multiplier applied by work-context boosts.
    pub boost_factor: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: 20,
            max_top_k: 100,
            sample_multiplier: 20,
            min_sample: 2000,
            early_termination_ratio: 0.95,
            scan_batch_size: 256,
            candidate_cutoff: 100,
            rrf_k: 60.0,
            rrf_weight_vector: 1.0,
            rrf_weight_bm25: 1.0,
            boost_factor: 1.25,
        }
    }
}

/// Embedding provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    /// Ollama HTTP API.
    Ollama,
    /// Deterministic local token-hashing embedder.
    Hashing,
    /// Use Ollama when reachable, hashing otherwise.
    Auto,
}

impl Default for EmbeddingProviderKind {
    fn default() -> Self {
        Self::Auto
    }
}

/// Embedder and cache options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    /// Ollama embedding model.
    pub model: String,
    /// Ollama base URL.
    pub base_url: String,
    /// Vector dimension; fixed at store open.
    pub dimension: usize,
    /// LRU cache capacity in entries.
    pub cache_capacity: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Auto,
            model: "nomic-embed-text".to_string(),
            base_url: "http://localhost:11434".to_string(),
            dimension: 768,
            cache_capacity: 10_000,
        }
    }
}

/// Server transport and throttling options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 0 serves JSON-RPC over stdio; a non-zero port requests the HTTP
    /// transport, which is provided by an external front-end.
    pub port: u16,
    /// Token-bucket refill rate for `tools/call` requests.
    pub rate_limit_per_sec: f64,
    /// Token-bucket burst capacity.
    pub rate_limit_burst: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            rate_limit_per_sec: 50.0,
            rate_limit_burst: 100,
        }
    }
}

impl Config {
    /// The directory holding the database and indexer state files.
    pub fn data_dir(&self) -> PathBuf {
        self.database
            .path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Path of the persisted indexer state file.
    pub fn indexer_state_path(&self) -> PathBuf {
        self.data_dir().join("indexer_state.json")
    }
}

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the Conexus engine.
//!
//! This module provides strongly-typed errors for each subsystem,
//! using `thiserror` for ergonomic error definitions and `anyhow` for
//! application-level propagation.

use thiserror::Error;

/// Errors produced by the document/vector store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("operation cancelled")]
    Cancelled,

    #[error("search deadline exceeded")]
    DeadlineExceeded,

    #[error("store is closed")]
    Closed,

    #[error("store is degraded and refusing writes: {0}")]
    Degraded(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    /// True for errors that indicate on-disk corruption rather than a
    /// recoverable per-operation failure.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }
}

/// Errors produced by embedding providers.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("embedding API error: {0}")]
    Api(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    #[error("operation cancelled")]
    Cancelled,
}

/// Errors produced by the walker, chunker, and indexing controller.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("an indexing run is already active")]
    AlreadyRunning,

    #[error("failed to walk {path}: {cause}")]
    Walk { path: String, cause: String },

    #[error("path escapes the indexing root: {0}")]
    PathOutsideRoot(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("indexer state error: {0}")]
    State(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors produced by the connector registry and connector backends.
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("connector not found: {0}")]
    NotFound(String),

    #[error("connector already exists: {0}")]
    Duplicate(String),

    #[error("invalid connector config: {0}")]
    InvalidConfig(String),

    #[error("connector backend error: {0}")]
    External(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("invalid config format: {0}")]
    InvalidFormat(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Top-level engine error aggregating the subsystem errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Map the error to its JSON-RPC 2.0 error code.
    ///
    /// Validation failures map to `-32602`; everything that reaches the
    /// core and fails maps to `-32603` with the typed message preserved.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::InvalidInput(_) => -32602,
            Self::Store(StoreError::InvalidInput(_) | StoreError::DimensionMismatch { .. }) => {
                -32602
            }
            _ => -32603,
        }
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading and types.

pub mod loader;
pub mod types;

pub use loader::{load_config, validate};
pub use types::{
    Config, DatabaseConfig, EmbeddingConfig, EmbeddingProviderKind, IndexerConfig, SearchConfig,
    ServerConfig,
};

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Embedding providers and caching.
//!
//! The engine never trains embeddings; an [`Embedder`] is injected and
//! everything downstream treats vectors as opaque fixed-dimension data.
//!
//! - [`OllamaEmbedder`] - local Ollama HTTP API
//! - [`HashingEmbedder`] - deterministic token-hashing fallback
//! - [`CachedEmbedder`] - LRU cache wrapper with hit/miss counters

pub mod base;
pub mod cache;
pub mod hashing;
pub mod ollama;

pub use base::Embedder;
pub use cache::{CacheStats, CachedEmbedder, EmbeddingCache};
pub use hashing::HashingEmbedder;
pub use ollama::OllamaEmbedder;

use std::sync::Arc;

use crate::config::{EmbeddingConfig, EmbeddingProviderKind};

/// Build the configured embedder, wrapped in the LRU cache.
///
/// `Auto` probes Ollama once and falls back to the hashing provider with
/// a warning when it is unreachable.
pub async fn create_embedder(config: &EmbeddingConfig) -> Arc<dyn Embedder> {
    let inner: Arc<dyn Embedder> = match config.provider {
        EmbeddingProviderKind::Ollama => Arc::new(OllamaEmbedder::new(
            &config.model,
            &config.base_url,
            config.dimension,
        )),
        EmbeddingProviderKind::Hashing => Arc::new(HashingEmbedder::new(config.dimension)),
        EmbeddingProviderKind::Auto => {
            let ollama = OllamaEmbedder::new(&config.model, &config.base_url, config.dimension);
            if ollama.is_available().await {
                tracing::info!(model = %config.model, "using Ollama embedding provider");
                Arc::new(ollama)
            } else {
                tracing::warn!(
                    base_url = %config.base_url,
                    "Ollama unreachable, falling back to hashing embedder"
                );
                Arc::new(HashingEmbedder::new(config.dimension))
            }
        }
    };
    Arc::new(CachedEmbedder::new(inner, config.cache_capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_hashing_embedder() {
        let config = EmbeddingConfig {
            provider: EmbeddingProviderKind::Hashing,
            dimension: 24,
            ..Default::default()
        };
        let embedder = create_embedder(&config).await;
        assert_eq!(embedder.dimension(), 24);
        let v = embedder.embed_one("hello").await.unwrap();
        assert_eq!(v.len(), 24);
    }
}

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Base trait for embedding providers.

use async_trait::async_trait;

use crate::error::EmbedError;

/// Trait for embedding providers.
///
/// Implementations must be safe for concurrent calls; the engine embeds
/// query text and chunk batches from multiple tasks.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// The fixed vector dimension produced by this provider.
    fn dimension(&self) -> usize;

    /// Generate embeddings for multiple texts, one vector per input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Generate an embedding for a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Api("no embedding returned".to_string()))
    }

    /// Check if the provider is reachable.
    async fn is_available(&self) -> bool;
}

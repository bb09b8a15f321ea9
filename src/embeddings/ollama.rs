// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ollama embedding provider.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::EmbedError;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::base::Embedder;

/// Ollama embedding request.
#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    prompt: String,
}

/// Ollama embedding response.
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Ollama embedding provider.
pub struct OllamaEmbedder {
    client: Client,
    model: String,
    base_url: String,
    dimension: usize,
    /// Semaphore to limit concurrent requests.
    request_semaphore: Arc<Semaphore>,
}

impl OllamaEmbedder {
    /// Max concurrent requests to Ollama.
    const MAX_CONCURRENT_REQUESTS: usize = 5;

    /// Create a new Ollama embedding provider with a fixed dimension.
    ///
    /// The dimension must match the model; a response of a different
    /// length is rejected rather than silently resizing the store.
    pub fn new(model: &str, base_url: &str, dimension: usize) -> Self {
        Self {
            client: Client::new(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            dimension,
            request_semaphore: Arc::new(Semaphore::new(Self::MAX_CONCURRENT_REQUESTS)),
        }
    }

    /// Make API request for a single embedding.
    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let start = Instant::now();

        let _permit = self
            .request_semaphore
            .acquire()
            .await
            .map_err(|e| EmbedError::Api(format!("failed to acquire request permit: {}", e)))?;

        let request = EmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbedError::Unavailable(format!("Ollama API request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EmbedError::Api(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(EmbedError::Api(format!(
                "Ollama API error ({}): {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| EmbedError::Api(format!("failed to parse embedding response: {}", e)))?;

        if parsed.embedding.len() != self.dimension {
            return Err(EmbedError::Dimension {
                expected: self.dimension,
                actual: parsed.embedding.len(),
            });
        }

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("embeddings.ollama.request", start.elapsed());
        #[cfg(not(feature = "telemetry"))]
        let _ = start;

        Ok(parsed.embedding)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.request_embedding(text).await?);
        }
        Ok(results)
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

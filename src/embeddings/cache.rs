// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Embedding cache with LRU eviction and hit/miss counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::EmbedError;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::base::Embedder;

/// Default max cache size.
const DEFAULT_CAPACITY: usize = 10_000;

/// Cache entry with access tracking for LRU eviction.
struct CacheEntry {
    vector: Vec<f32>,
    last_accessed: Instant,
}

/// Thread-safe LRU embedding cache.
///
/// Keys are SHA-256 of the normalized text; the stored vector is always
/// the embedding of the original, unnormalized text.
pub struct EmbeddingCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    /// Create a cache with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a cache with a custom capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache key: SHA-256 of the whitespace-collapsed, lowercased text.
    /// Normalization applies to the key only.
    pub fn make_key(text: &str) -> String {
        let normalized = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Get an embedding from cache.
    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        let mut entries = self.entries.write().ok()?;
        if let Some(entry) = entries.get_mut(key) {
            entry.last_accessed = Instant::now();
            self.hits.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "telemetry")]
            GLOBAL_METRICS.increment("embeddings.cache_hit");
            return Some(entry.vector.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.increment("embeddings.cache_miss");
        None
    }

    /// Put an embedding into cache, evicting the least recently used
    /// entry when at capacity.
    pub fn put(&self, key: String, vector: Vec<f32>) {
        let mut entries = match self.entries.write() {
            Ok(e) => e,
            Err(_) => return,
        };

        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            if let Some(oldest_key) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest_key);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                vector,
                last_accessed: Instant::now(),
            },
        );
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Clear all cached embeddings.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Wraps any embedder with the LRU cache.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: EmbeddingCache,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self {
            inner,
            cache: EmbeddingCache::with_capacity(capacity),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut miss_indices = Vec::new();
        let mut miss_texts = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let key = EmbeddingCache::make_key(text);
            match self.cache.get(&key) {
                Some(vector) => results.push(Some(vector)),
                None => {
                    results.push(None);
                    miss_indices.push(i);
                    miss_texts.push(text.clone());
                }
            }
        }

        if !miss_texts.is_empty() {
            let embedded = self.inner.embed_batch(&miss_texts).await?;
            if embedded.len() != miss_texts.len() {
                return Err(EmbedError::Api(format!(
                    "provider returned {} embeddings for {} texts",
                    embedded.len(),
                    miss_texts.len()
                )));
            }
            for (slot, (text, vector)) in miss_indices
                .iter()
                .zip(miss_texts.iter().zip(embedded.into_iter()))
            {
                if vector.len() != self.dimension() {
                    return Err(EmbedError::Dimension {
                        expected: self.dimension(),
                        actual: vector.len(),
                    });
                }
                self.cache.put(EmbeddingCache::make_key(text), vector.clone());
                results[*slot] = Some(vector);
            }
        }

        Ok(results.into_iter().map(|v| v.unwrap_or_default()).collect())
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::hashing::HashingEmbedder;

    #[test]
    fn test_key_normalization_affects_key_only() {
        let k1 = EmbeddingCache::make_key("Hello   World");
        let k2 = EmbeddingCache::make_key("hello world");
        let k3 = EmbeddingCache::make_key("hello\nworld");
        let k4 = EmbeddingCache::make_key("goodbye world");
        assert_eq!(k1, k2);
        assert_eq!(k1, k3);
        assert_ne!(k1, k4);
    }

    #[test]
    fn test_cache_put_get() {
        let cache = EmbeddingCache::new();
        let key = EmbeddingCache::make_key("fn main() {}");
        cache.put(key.clone(), vec![1.0, 2.0, 3.0]);
        assert_eq!(cache.get(&key), Some(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_cache_hit_miss_counters() {
        let cache = EmbeddingCache::new();
        let key = EmbeddingCache::make_key("text");
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), vec![1.0]);
        assert!(cache.get(&key).is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = EmbeddingCache::with_capacity(3);
        for i in 0..5 {
            cache.put(format!("key{}", i), vec![i as f32]);
            // Make access times strictly increasing.
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert!(cache.len() <= 3);
        assert!(cache.get("key0").is_none());
        assert!(cache.get("key4").is_some());
    }

    #[tokio::test]
    async fn test_cached_embedder_serves_repeats_from_cache() {
        let inner = Arc::new(HashingEmbedder::new(16));
        let cached = CachedEmbedder::new(inner, 100);

        let texts = vec!["alpha beta".to_string(), "gamma".to_string()];
        let first = cached.embed_batch(&texts).await.unwrap();
        let second = cached.embed_batch(&texts).await.unwrap();
        assert_eq!(first, second);

        let stats = cached.cache_stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.hits, 2);
    }
}

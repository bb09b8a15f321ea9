// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The engine façade.
//!
//! Owns the store, indexing controller, embedder, connector registry,
//! and rate limiter, and implements the tool-level operations the server
//! dispatches to. A query embeds through the configured provider, runs
//! hybrid retrieval on a blocking task, and degrades to BM25 alone when
//! the embedder is down.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::config::Config;
use crate::connectors::ConnectorRegistry;
use crate::embeddings::{create_embedder, Embedder};
use crate::error::EngineError;
use crate::index::IndexController;
use crate::safety::RateLimiter;
use crate::store::{
    Boosts, DocumentStore, SearchFilters, SearchHit, SearchOptions, SearchParams, StoreOptions,
};
use crate::types::Document;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

/// A fully validated search request.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: usize,
    pub offset: usize,
    pub filters: SearchFilters,
    pub boosts: Boosts,
    pub deadline: Option<Instant>,
}

/// Search results plus paging and timing metadata.
#[derive(Debug)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub total_count: usize,
    pub query_time_ms: f64,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
    pub degraded: bool,
}

/// A related item that is a local chunk.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedItem {
    pub id: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub score: f32,
    pub snippet: String,
}

/// A related discussion from a chat source.
#[derive(Debug, Clone, Serialize)]
pub struct Discussion {
    pub channel: String,
    pub timestamp: String,
    pub summary: String,
}

/// Aggregated related information for a file or ticket.
#[derive(Debug, Clone, Serialize, Default)]
pub struct RelatedInfo {
    pub summary: String,
    pub related_items: Vec<RelatedItem>,
    pub related_prs: Vec<String>,
    pub related_issues: Vec<String>,
    pub discussions: Vec<Discussion>,
}

/// The context engine: one instance owns one store.
pub struct ContextEngine {
    config: Config,
    store: Arc<DocumentStore>,
    embedder: Arc<dyn Embedder>,
    controller: Arc<IndexController>,
    connectors: Arc<ConnectorRegistry>,
    limiter: Arc<RateLimiter>,
}

impl ContextEngine {
    /// Build an engine from configuration.
    pub async fn new(config: Config) -> Result<Self, EngineError> {
        crate::config::validate(&config)?;

        let mut store_options =
            StoreOptions::new(config.database.path.clone(), config.embedding.dimension);
        store_options.search = SearchParams::from(&config.search);
        let store = Arc::new(DocumentStore::open(store_options)?);

        let embedder = create_embedder(&config.embedding).await;
        let controller = Arc::new(IndexController::new(&config, store.clone(), embedder.clone())?);
        let connectors = Arc::new(ConnectorRegistry::new(store.clone()));
        let limiter = Arc::new(RateLimiter::new(
            config.server.rate_limit_burst,
            config.server.rate_limit_per_sec,
        ));

        Ok(Self {
            config,
            store,
            embedder,
            controller,
            connectors,
            limiter,
        })
    }

    /// Build an engine around an already injected embedder.
    pub fn with_embedder(config: Config, embedder: Arc<dyn Embedder>) -> Result<Self, EngineError> {
        crate::config::validate(&config)?;

        let mut store_options =
            StoreOptions::new(config.database.path.clone(), config.embedding.dimension);
        store_options.search = SearchParams::from(&config.search);
        let store = Arc::new(DocumentStore::open(store_options)?);
        let controller = Arc::new(IndexController::new(&config, store.clone(), embedder.clone())?);
        let connectors = Arc::new(ConnectorRegistry::new(store.clone()));
        let limiter = Arc::new(RateLimiter::new(
            config.server.rate_limit_burst,
            config.server.rate_limit_per_sec,
        ));

        Ok(Self {
            config,
            store,
            embedder,
            controller,
            connectors,
            limiter,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    pub fn controller(&self) -> &Arc<IndexController> {
        &self.controller
    }

    pub fn connectors(&self) -> &Arc<ConnectorRegistry> {
        &self.connectors
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Hybrid context search.
    pub async fn search(&self, req: SearchRequest) -> Result<SearchResponse, EngineError> {
        if req.query.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "query must not be empty".to_string(),
            ));
        }
        let max_top_k = self.config.search.max_top_k;
        if req.top_k == 0 || req.top_k > max_top_k {
            return Err(EngineError::InvalidInput(format!(
                "top_k must be in 1..={}",
                max_top_k
            )));
        }

        let start = Instant::now();

        // The vector side drops out when the embedder fails; BM25 still
        // answers, flagged degraded.
        let query_vec = match self.embedder.embed_one(&req.query).await {
            Ok(v) if v.iter().any(|x| *x != 0.0) => Some(v),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, degrading to BM25");
                #[cfg(feature = "telemetry")]
                GLOBAL_METRICS.increment("search.embed_failures");
                None
            }
        };

        let opts = SearchOptions {
            limit: req.top_k,
            offset: req.offset,
            filters: req.filters,
            boosts: req.boosts,
            deadline: req.deadline,
            cancel: None,
        };
        let store = self.store.clone();
        let query = req.query.clone();
        let page = tokio::task::spawn_blocking(move || {
            store.search_hybrid(&query, query_vec.as_deref(), &opts)
        })
        .await
        .map_err(|e| EngineError::Internal(format!("search task failed: {}", e)))??;

        let query_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("engine.search", start.elapsed());

        Ok(SearchResponse {
            results: page.hits,
            total_count: page.total_matching,
            query_time_ms,
            offset: req.offset,
            limit: req.top_k,
            has_more: page.has_more,
            degraded: page.degraded,
        })
    }

    /// Related information for exactly one of a file path or a ticket.
    ///
    /// The file variant combines the file's own chunks with a textual
    /// search seeded by the file's basename. A coarse heuristic; an
    /// import/reference graph would be the stronger signal here.
    pub async fn related_info(
        &self,
        file_path: Option<String>,
        ticket_id: Option<String>,
    ) -> Result<RelatedInfo, EngineError> {
        match (file_path, ticket_id) {
            (Some(path), None) => self.related_for_file(&path).await,
            (None, Some(ticket)) => self.related_for_ticket(&ticket),
            _ => Err(EngineError::InvalidInput(
                "exactly one of file_path or ticket_id is required".to_string(),
            )),
        }
    }

    async fn related_for_file(&self, path: &str) -> Result<RelatedInfo, EngineError> {
        let rel = self
            .controller
            .validator()
            .relativize(Path::new(path))
            .map_err(EngineError::Index)?;

        let mut scored: Vec<(Document, f32)> = self
            .store
            .find_by_file(&rel, 50)?
            .into_iter()
            .map(|d| (d, 1.0))
            .collect();
        let mut seen: std::collections::HashSet<String> =
            scored.iter().map(|(d, _)| d.id.clone()).collect();

        let seed = Path::new(&rel)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(rel.as_str())
            .replace(['_', '-', '.'], " ");
        if !seed.trim().is_empty() {
            let request = SearchRequest {
                query: seed,
                top_k: self.config.search.default_top_k,
                offset: 0,
                filters: SearchFilters::default(),
                boosts: Boosts::default(),
                deadline: None,
            };
            if let Ok(response) = self.search(request).await {
                for hit in response.results {
                    if seen.insert(hit.doc.id.clone()) {
                        scored.push((hit.doc, hit.score));
                    }
                }
            }
        }

        let mut info = bucket_related(scored);
        info.summary = format!(
            "{} related items for {}",
            info.related_items.len()
                + info.related_prs.len()
                + info.related_issues.len()
                + info.discussions.len(),
            rel
        );
        Ok(info)
    }

    fn related_for_ticket(&self, ticket: &str) -> Result<RelatedInfo, EngineError> {
        if ticket.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "ticket_id must not be empty".to_string(),
            ));
        }
        let docs = self.store.find_by_ticket(ticket, 50)?;
        let scored: Vec<(Document, f32)> = docs.into_iter().map(|d| (d, 1.0)).collect();

        let mut info = bucket_related(scored);
        info.summary = format!(
            "{} related items for ticket {}",
            info.related_items.len()
                + info.related_prs.len()
                + info.related_issues.len()
                + info.discussions.len(),
            ticket
        );
        Ok(info)
    }

    /// Stop any active run and close the store.
    pub async fn close(&self) {
        let _ = self.controller.stop().await;
        self.store.close();
    }
}

/// Bucket documents by source type into the related-info shape.
fn bucket_related(scored: Vec<(Document, f32)>) -> RelatedInfo {
    let mut info = RelatedInfo::default();
    for (doc, score) in scored {
        match doc.source_type() {
            Some("github_pr") => {
                let label = doc
                    .metadata
                    .get("pr_number")
                    .map(|v| format!("#{}", v).replace('"', ""))
                    .unwrap_or_else(|| doc.id.clone());
                info.related_prs.push(label);
            }
            Some("github_issue") => {
                info.related_issues.push(doc.id.clone());
            }
            Some("slack") => {
                let channel = doc
                    .metadata
                    .get("channel")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let timestamp = doc
                    .indexed_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                info.discussions.push(Discussion {
                    channel,
                    timestamp,
                    summary: snippet(&doc.content, 160),
                });
            }
            _ => {
                info.related_items.push(RelatedItem {
                    id: doc.id.clone(),
                    file_path: doc.file_path.clone(),
                    start_line: doc.start_line,
                    end_line: doc.end_line,
                    score,
                    snippet: snippet(&doc.content, 200),
                });
            }
        }
    }
    info
}

/// First `max` characters, cut on a char boundary.
fn snippet(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_cuts_on_char_boundary() {
        assert_eq!(snippet("short", 10), "short");
        let long = "a".repeat(30);
        let s = snippet(&long, 10);
        assert!(s.starts_with("aaaaaaaaaa"));
        assert!(s.ends_with("..."));
    }

    #[test]
    fn test_bucket_related_by_source_type() {
        let mut pr = Document::new(
            "fix race".to_string(),
            "github/pr/42".to_string(),
            "unknown".to_string(),
            crate::types::ChunkType::Unknown,
            "",
            1,
            1,
        );
        pr.metadata
            .insert("source_type".to_string(), serde_json::json!("github_pr"));
        pr.metadata
            .insert("pr_number".to_string(), serde_json::json!(42));

        let mut slack = Document::new(
            "we should ship this".to_string(),
            "slack/eng/123".to_string(),
            "unknown".to_string(),
            crate::types::ChunkType::Unknown,
            "",
            1,
            1,
        );
        slack
            .metadata
            .insert("source_type".to_string(), serde_json::json!("slack"));
        slack
            .metadata
            .insert("channel".to_string(), serde_json::json!("#eng"));

        let local = Document::new(
            "fn auth() {}".to_string(),
            "src/auth.rs".to_string(),
            "rust".to_string(),
            crate::types::ChunkType::Function,
            "auth",
            1,
            1,
        );

        let info = bucket_related(vec![(pr, 1.0), (slack, 0.9), (local, 0.8)]);
        assert_eq!(info.related_prs, vec!["#42"]);
        assert_eq!(info.discussions.len(), 1);
        assert_eq!(info.discussions[0].channel, "#eng");
        assert_eq!(info.related_items.len(), 1);
        assert_eq!(info.related_items[0].file_path, "src/auth.rs");
    }
}

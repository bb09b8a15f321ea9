// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Hybrid retrieval: sampled vector k-NN, FTS5 BM25, and RRF fusion.
//!
//! Vector search scores a query-seeded pseudo-random sample of the
//! embedding set instead of the full corpus, with early termination once
//! the result heap cannot improve. BM25 comes from the FTS5 layer. Hybrid
//! queries fuse the two rankings with Reciprocal Rank Fusion and apply
//! work-context boosts before pagination.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::config::SearchConfig;
use crate::error::StoreError;
use crate::types::{CancelToken, Document};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::{decode_vector, format_timestamp, DocumentStore};

/// Tuning parameters for retrieval; every knob is exposed.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Sample size multiplier: `S = min(N, max(k * multiplier, min_sample))`.
    pub sample_multiplier: usize,
    /// Minimum candidate sample size.
    pub min_sample: usize,
    /// Stop scanning once `heap_min > ratio * theoretical_max`.
    pub early_termination_ratio: f32,
    /// Documents scored per scan batch.
    pub scan_batch_size: usize,
    /// Per-ranker candidate cutoff for fusion.
    pub candidate_cutoff: usize,
    /// RRF rank constant.
    pub rrf_k: f32,
    /// RRF weight of the vector ranking.
    pub rrf_weight_vector: f32,
    /// RRF weight of the BM25 ranking.
    pub rrf_weight_bm25: f32,
    /// Multiplier applied by work-context boosts.
    pub boost_factor: f32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
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

impl From<&SearchConfig> for SearchParams {
    fn from(config: &SearchConfig) -> Self {
        Self {
            sample_multiplier: config.sample_multiplier,
            min_sample: config.min_sample,
            early_termination_ratio: config.early_termination_ratio,
            scan_batch_size: config.scan_batch_size.max(1),
            candidate_cutoff: config.candidate_cutoff,
            rrf_k: config.rrf_k,
            rrf_weight_vector: config.rrf_weight_vector,
            rrf_weight_bm25: config.rrf_weight_bm25,
            boost_factor: config.boost_factor,
        }
    }
}

/// Metadata filters; all present fields are AND-combined.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub source_types: Option<Vec<String>>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub file_path: Option<String>,
    pub ticket_ids: Option<Vec<String>>,
    pub git_branch: Option<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.source_types.is_none()
            && self.date_from.is_none()
            && self.date_to.is_none()
            && self.file_path.is_none()
            && self.ticket_ids.is_none()
            && self.git_branch.is_none()
    }
}

/// Work-context hints that boost (never filter) matching documents.
#[derive(Debug, Clone, Default)]
pub struct Boosts {
    /// Boost documents from this file path.
    pub file: Option<String>,
    /// Boost documents whose `ticket_ids` intersect these.
    pub tickets: Vec<String>,
}

impl Boosts {
    pub fn is_empty(&self) -> bool {
        self.file.is_none() && self.tickets.is_empty()
    }
}

/// Options common to all search operations.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub offset: usize,
    pub filters: SearchFilters,
    pub boosts: Boosts,
    /// All-or-nothing deadline; expiry returns `DeadlineExceeded`.
    pub deadline: Option<Instant>,
    pub cancel: Option<CancelToken>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            offset: 0,
            filters: SearchFilters::default(),
            boosts: Boosts::default(),
            deadline: None,
            cancel: None,
        }
    }
}

/// One ranked result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub doc: Document,
    pub score: f32,
}

/// A page of ranked results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    pub total_matching: usize,
    pub has_more: bool,
    /// True when hybrid search fell back to BM25 alone.
    pub degraded: bool,
}

impl DocumentStore {
    /// Approximate k-NN over the embedding set.
    pub fn search_vector(
        &self,
        query: &[f32],
        opts: &SearchOptions,
    ) -> Result<SearchPage, StoreError> {
        let start = Instant::now();
        // A fixed candidate depth keeps page concatenation consistent:
        // every page of one query ranks the same candidate list.
        let k = self
            .search_params()
            .candidate_cutoff
            .max(opts.offset.saturating_add(opts.limit));
        let (ranked, total) = self.vector_topk(query, k, opts)?;
        let page = self.rank_to_page(ranked_without_vec_rank(ranked), total, opts, false)?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("store.search_vector", start.elapsed());
        #[cfg(not(feature = "telemetry"))]
        let _ = start;

        Ok(page)
    }

    /// BM25 lexical search via the FTS5 layer.
    pub fn search_bm25(
        &self,
        query_text: &str,
        opts: &SearchOptions,
    ) -> Result<SearchPage, StoreError> {
        let start = Instant::now();
        check_interrupts(opts)?;

        let cutoff = self
            .search_params()
            .candidate_cutoff
            .max(opts.offset.saturating_add(opts.limit));
        let ranked = self.bm25_ranked(query_text, cutoff, &opts.filters)?;
        check_interrupts(opts)?;

        let total = ranked.len();
        let page = self.rank_to_page(ranked_without_vec_rank(ranked), total, opts, false)?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("store.search_bm25", start.elapsed());
        #[cfg(not(feature = "telemetry"))]
        let _ = start;

        Ok(page)
    }

    /// Hybrid search: RRF fusion of the vector and BM25 rankings.
    ///
    /// With no query vector (embedder down) the BM25 ranking is used
    /// alone and the page is marked degraded.
    pub fn search_hybrid(
        &self,
        query_text: &str,
        query_vec: Option<&[f32]>,
        opts: &SearchOptions,
    ) -> Result<SearchPage, StoreError> {
        let start = Instant::now();
        let params = self.search_params().clone();
        let cutoff = params.candidate_cutoff;

        let vec_list = match query_vec {
            Some(v) => self.vector_topk(v, cutoff, opts)?.0,
            None => Vec::new(),
        };
        let degraded = query_vec.is_none();
        if degraded {
            tracing::warn!("hybrid search degraded to BM25 only: no query vector");
            #[cfg(feature = "telemetry")]
            GLOBAL_METRICS.increment("search.degraded");
        }

        let bm25_list = self.bm25_ranked(query_text, cutoff, &opts.filters)?;
        check_interrupts(opts)?;

        let fused = rrf_fuse(
            &vec_list,
            &bm25_list,
            params.rrf_k,
            params.rrf_weight_vector,
            params.rrf_weight_bm25,
        );
        let total = fused.len();
        let page = self.rank_to_page(fused, total, opts, degraded)?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("store.search_hybrid", start.elapsed());
        #[cfg(not(feature = "telemetry"))]
        let _ = start;

        Ok(page)
    }

    /// Materialize a ranked id list into a page: fetch documents, apply
    /// boosts, re-sort with deterministic tie-breaks, and paginate.
    fn rank_to_page(
        &self,
        ranked: Vec<RankedId>,
        total_matching: usize,
        opts: &SearchOptions,
        degraded: bool,
    ) -> Result<SearchPage, StoreError> {
        let ids: Vec<String> = ranked.iter().map(|r| r.id.clone()).collect();
        let mut docs = self.get_documents(&ids)?;

        let factor = self.search_params().boost_factor;
        let mut scored: Vec<(RankedId, Document)> = ranked
            .into_iter()
            .filter_map(|r| docs.remove(&r.id).map(|d| (r, d)))
            .collect();

        if !opts.boosts.is_empty() {
            for (r, doc) in &mut scored {
                if boost_applies(&opts.boosts, doc) {
                    r.score *= factor;
                }
            }
        }

        scored.sort_by(|(a, da), (b, db)| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| {
                    a.vec_rank
                        .unwrap_or(usize::MAX)
                        .cmp(&b.vec_rank.unwrap_or(usize::MAX))
                })
                .then_with(|| da.id.cmp(&db.id))
        });

        let hits: Vec<SearchHit> = scored
            .into_iter()
            .skip(opts.offset)
            .take(opts.limit)
            .map(|(r, doc)| SearchHit {
                doc,
                score: r.score,
            })
            .collect();

        let has_more = opts.offset + hits.len() < total_matching;
        Ok(SearchPage {
            hits,
            total_matching,
            has_more,
            degraded,
        })
    }

    /// Top-k cosine similarity over a sampled candidate set.
    ///
    /// Returns the ranked `(id, score)` list and the number of candidates
    /// actually scored.
    fn vector_topk(
        &self,
        query: &[f32],
        k: usize,
        opts: &SearchOptions,
    ) -> Result<(Vec<(String, f32)>, usize), StoreError> {
        if query.len() != self.dimension() {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok((Vec::new(), 0));
        }
        let query_norm = super::l2_norm(query);
        if query_norm == 0.0 {
            return Ok((Vec::new(), 0));
        }
        check_interrupts(opts)?;

        let params = self.search_params().clone();
        let filters = opts.filters.clone();
        let deadline = opts.deadline;
        let cancel = opts.cancel.clone();

        self.read(|conn| {
            // Candidate universe. Selective filters (<10% of the corpus)
            // restrict the universe before sampling; otherwise the full
            // set is sampled and filtered after scoring.
            let (universe, post_filter): (Vec<String>, Option<HashSet<String>>) =
                if filters.is_empty() {
                    (all_embedded_ids(conn)?, None)
                } else {
                    let filtered = filtered_embedded_ids(conn, &filters)?;
                    let total: i64 = conn
                        .query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))
                        .map_err(|e| StoreError::Storage(format!("failed to count: {}", e)))?;
                    if (filtered.len() as i64) * 10 < total {
                        (filtered, None)
                    } else {
                        let set: HashSet<String> = filtered.into_iter().collect();
                        (all_embedded_ids(conn)?, Some(set))
                    }
                };

            let n = universe.len();
            if n == 0 {
                return Ok((Vec::new(), 0));
            }

            let sample_size = n.min((k * params.sample_multiplier).max(params.min_sample));
            let seed = query_seed(query);
            let sample = sample_indices(seed, n, sample_size);

            let mut heap: BinaryHeap<Reverse<HeapItem>> = BinaryHeap::with_capacity(k + 1);
            let mut scored = 0usize;

            for batch in sample.chunks(params.scan_batch_size) {
                if let Some(cancel) = &cancel {
                    if cancel.is_cancelled() {
                        return Err(StoreError::Cancelled);
                    }
                }
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        return Err(StoreError::DeadlineExceeded);
                    }
                }

                let ids: Vec<&String> = batch.iter().map(|&i| &universe[i]).collect();
                for (id, blob, norm) in fetch_vectors(conn, &ids)? {
                    if let Some(set) = &post_filter {
                        if !set.contains(&id) {
                            continue;
                        }
                    }
                    let vector = decode_vector(&blob);
                    if vector.len() != query.len() || norm == 0.0 {
                        continue;
                    }
                    let dot: f32 = query.iter().zip(vector.iter()).map(|(a, b)| a * b).sum();
                    let score = dot / (query_norm * norm);
                    scored += 1;

                    heap.push(Reverse(HeapItem {
                        score,
                        id,
                    }));
                    if heap.len() > k {
                        heap.pop();
                    }
                }

                // The heap cannot meaningfully improve once its minimum
                // is within the termination ratio of the best possible
                // cosine score. Termination never recovers documents
                // outside the sample.
                if heap.len() == k {
                    if let Some(Reverse(min_item)) = heap.peek() {
                        if min_item.score > params.early_termination_ratio * 1.0 {
                            break;
                        }
                    }
                }
            }

            let mut ranked: Vec<(String, f32)> = heap
                .into_iter()
                .map(|Reverse(item)| (item.id, item.score))
                .collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            Ok((ranked, scored))
        })
    }

    /// BM25-ranked ids via FTS5, best first, filters applied in SQL.
    fn bm25_ranked(
        &self,
        query_text: &str,
        cutoff: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<(String, f32)>, StoreError> {
        let match_expr = fts_match_expr(query_text);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        let (filter_sql, filter_params) = filter_clause(filters);
        let sql = format!(
            "SELECT fts.doc_id, fts.rank FROM fts
             JOIN documents d ON d.id = fts.doc_id
             WHERE fts MATCH ?1{}
             ORDER BY fts.rank
             LIMIT {}",
            filter_sql, cutoff as i64
        );

        self.read(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| StoreError::Storage(format!("failed to prepare bm25 query: {}", e)))?;

            let mut params: Vec<rusqlite::types::Value> =
                vec![rusqlite::types::Value::Text(match_expr.clone())];
            params.extend(filter_params.iter().cloned());

            let rows = stmt
                .query_map(rusqlite::params_from_iter(params), |row| {
                    let id: String = row.get(0)?;
                    let rank: f64 = row.get(1)?;
                    Ok((id, rank))
                })
                .map_err(|e| StoreError::Storage(format!("bm25 query failed: {}", e)))?;

            // FTS5 rank is negative BM25; negate so higher is better.
            let mut ranked = Vec::new();
            for row in rows {
                let (id, rank) =
                    row.map_err(|e| StoreError::Storage(format!("bm25 row failed: {}", e)))?;
                ranked.push((id, -(rank as f32)));
            }
            Ok(ranked)
        })
    }
}

/// A ranked id carrying its fused score and vector rank for tie-breaks.
#[derive(Debug, Clone)]
struct RankedId {
    id: String,
    score: f32,
    vec_rank: Option<usize>,
}

fn ranked_without_vec_rank(list: Vec<(String, f32)>) -> Vec<RankedId> {
    list.into_iter()
        .map(|(id, score)| RankedId {
            id,
            score,
            vec_rank: None,
        })
        .collect()
}

/// Reciprocal Rank Fusion of the two candidate lists.
///
/// `score(d) = w_vec/(K + rank_vec(d)) + w_bm25/(K + rank_bm25(d))`,
/// with absent ranks contributing zero.
fn rrf_fuse(
    vec_list: &[(String, f32)],
    bm25_list: &[(String, f32)],
    k: f32,
    w_vec: f32,
    w_bm25: f32,
) -> Vec<RankedId> {
    let mut fused: HashMap<String, RankedId> = HashMap::new();

    for (rank, (id, _)) in vec_list.iter().enumerate() {
        let entry = fused.entry(id.clone()).or_insert_with(|| RankedId {
            id: id.clone(),
            score: 0.0,
            vec_rank: None,
        });
        entry.score += w_vec / (k + (rank + 1) as f32);
        entry.vec_rank = Some(rank + 1);
    }

    for (rank, (id, _)) in bm25_list.iter().enumerate() {
        let entry = fused.entry(id.clone()).or_insert_with(|| RankedId {
            id: id.clone(),
            score: 0.0,
            vec_rank: None,
        });
        entry.score += w_bm25 / (k + (rank + 1) as f32);
    }

    fused.into_values().collect()
}

fn boost_applies(boosts: &Boosts, doc: &Document) -> bool {
    if let Some(file) = &boosts.file {
        if doc.file_path == *file {
            return true;
        }
    }
    if !boosts.tickets.is_empty() {
        let doc_tickets = doc.ticket_ids();
        if boosts.tickets.iter().any(|t| doc_tickets.contains(t)) {
            return true;
        }
    }
    false
}

fn check_interrupts(opts: &SearchOptions) -> Result<(), StoreError> {
    if let Some(cancel) = &opts.cancel {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
    }
    if let Some(deadline) = opts.deadline {
        if Instant::now() >= deadline {
            return Err(StoreError::DeadlineExceeded);
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// SQL helpers
// ----------------------------------------------------------------------

fn all_embedded_ids(conn: &Connection) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn
        .prepare("SELECT doc_id FROM embeddings ORDER BY doc_id")
        .map_err(|e| StoreError::Storage(format!("failed to prepare id scan: {}", e)))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| StoreError::Storage(format!("failed to scan ids: {}", e)))?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn filtered_embedded_ids(
    conn: &Connection,
    filters: &SearchFilters,
) -> Result<Vec<String>, StoreError> {
    let (filter_sql, filter_params) = filter_clause(filters);
    let sql = format!(
        "SELECT d.id FROM documents d
         JOIN embeddings e ON e.doc_id = d.id
         WHERE 1=1{}
         ORDER BY d.id",
        filter_sql
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| StoreError::Storage(format!("failed to prepare filtered scan: {}", e)))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(filter_params), |row| {
            row.get::<_, String>(0)
        })
        .map_err(|e| StoreError::Storage(format!("failed to scan filtered ids: {}", e)))?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Build the AND-combined filter clause (prefixed with ` AND`) and its
/// bind parameters. The document table must be aliased `d`.
fn filter_clause(filters: &SearchFilters) -> (String, Vec<rusqlite::types::Value>) {
    use rusqlite::types::Value;

    let mut sql = String::new();
    let mut params: Vec<Value> = Vec::new();

    if let Some(types) = &filters.source_types {
        if !types.is_empty() {
            let placeholders = vec!["?"; types.len()].join(",");
            sql.push_str(&format!(
                " AND json_extract(d.metadata_json, '$.source_type') IN ({})",
                placeholders
            ));
            params.extend(types.iter().map(|t| Value::Text(t.clone())));
        }
    }
    if let Some(from) = filters.date_from {
        sql.push_str(" AND d.indexed_at >= ?");
        params.push(Value::Text(format_timestamp(from)));
    }
    if let Some(to) = filters.date_to {
        sql.push_str(" AND d.indexed_at <= ?");
        params.push(Value::Text(format_timestamp(to)));
    }
    if let Some(path) = &filters.file_path {
        sql.push_str(" AND d.file_path = ?");
        params.push(Value::Text(path.clone()));
    }
    if let Some(branch) = &filters.git_branch {
        sql.push_str(" AND json_extract(d.metadata_json, '$.git_branch') = ?");
        params.push(Value::Text(branch.clone()));
    }
    if let Some(tickets) = &filters.ticket_ids {
        if !tickets.is_empty() {
            let placeholders = vec!["?"; tickets.len()].join(",");
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM json_each(d.metadata_json, '$.ticket_ids')
                              WHERE json_each.value IN ({}))",
                placeholders
            ));
            params.extend(tickets.iter().map(|t| Value::Text(t.clone())));
        }
    }

    (sql, params)
}

fn fetch_vectors(
    conn: &Connection,
    ids: &[&String],
) -> Result<Vec<(String, Vec<u8>, f32)>, StoreError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; ids.len()].join(",");
    let sql = format!(
        "SELECT doc_id, vector, norm FROM embeddings WHERE doc_id IN ({})",
        placeholders
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| StoreError::Storage(format!("failed to prepare vector fetch: {}", e)))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
            let id: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            let norm: f64 = row.get(2)?;
            Ok((id, blob, norm as f32))
        })
        .map_err(|e| StoreError::Storage(format!("vector fetch failed: {}", e)))?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Sanitize free text into an FTS5 match expression: quoted unicode
/// word tokens joined with OR.
fn fts_match_expr(query: &str) -> String {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    tokens.join(" OR ")
}

// ----------------------------------------------------------------------
// Sampling
// ----------------------------------------------------------------------

/// Seed derived from the query vector bytes so sampling is deterministic
/// per query.
fn query_seed(query: &[f32]) -> u64 {
    let mut hasher = Sha256::new();
    for v in query {
        hasher.update(v.to_le_bytes());
    }
    let digest = hasher.finalize();
    let mut seed = 0u64;
    for (i, b) in digest.iter().take(8).enumerate() {
        seed |= (*b as u64) << (8 * i);
    }
    seed
}

/// SplitMix64 generator; small, fast, and stable across releases.
struct SplitMix64(u64);

impl SplitMix64 {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }
}

/// First `s` positions of a seeded Fisher-Yates shuffle of `0..n`.
fn sample_indices(seed: u64, n: usize, s: usize) -> Vec<usize> {
    debug_assert!(s <= n);
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = SplitMix64(seed);
    for i in 0..s {
        let j = i + (rng.next() as usize) % (n - i);
        indices.swap(i, j);
    }
    indices.truncate(s);
    indices
}

/// Min-heap entry ordered by score, then id for determinism.
#[derive(Debug, PartialEq)]
struct HeapItem {
    score: f32,
    id: String,
}

impl Eq for HeapItem {}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

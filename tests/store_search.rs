// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cross-cutting store and retrieval behavior: hybrid ranking, boosts,
//! pagination, determinism, filters, and deadlines.

use std::time::{Duration, Instant};

use conexus::store::{
    Boosts, DocumentStore, SearchFilters, SearchOptions, SearchParams, StoreOptions,
};
use conexus::types::{CancelToken, ChunkType, Document};
use conexus::StoreError;

// ============================================================================
// Helpers
// ============================================================================

fn open_store(dir: &tempfile::TempDir, dimension: usize, params: SearchParams) -> DocumentStore {
    let mut options = StoreOptions::new(dir.path().join("db.sqlite"), dimension);
    options.search = params;
    DocumentStore::open(options).unwrap()
}

fn doc(file: &str, symbol: &str, line: u32, content: &str) -> Document {
    Document::new(
        content.to_string(),
        file.to_string(),
        "go".to_string(),
        ChunkType::Function,
        symbol,
        line,
        line + 3,
    )
}

fn embedded(file: &str, symbol: &str, line: u32, content: &str, vector: Vec<f32>) -> Document {
    let mut d = doc(file, symbol, line, content);
    d.embedding = Some(vector);
    d
}

/// Deterministic pseudo-random unit vector.
fn unit_vector(dimension: usize, seed: u64) -> Vec<f32> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let mut v: Vec<f32> = (0..dimension)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 33) as f32 / (1u64 << 31) as f32) - 1.0
        })
        .collect();
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    for x in &mut v {
        *x /= norm;
    }
    v
}

fn opts(limit: usize, offset: usize) -> SearchOptions {
    SearchOptions {
        limit,
        offset,
        ..Default::default()
    }
}

// ============================================================================
// BM25
// ============================================================================

#[test]
fn test_bm25_prefers_matching_document() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 4, SearchParams::default());

    store
        .upsert_batch(&[
            doc("pkg/x.go", "Foo", 5, "func Foo() { configure the Foo widget with Foo defaults }"),
            doc("pkg/x.go", "Bar", 15, "func Bar() { unrelated bar logic }"),
        ])
        .unwrap();

    let page = store.search_bm25("Foo", &opts(10, 0)).unwrap();
    assert_eq!(page.hits.len(), 1);
    assert_eq!(page.hits[0].doc.id, "pkg/x.go:function:Foo:5");
    assert!(page.hits[0].score > 0.0);
}

#[test]
fn test_bm25_term_frequency_monotonicity() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 4, SearchParams::default());

    store
        .upsert_batch(&[
            doc("a.go", "Once", 1, "gateway padding words here to equalize the text length ok"),
            doc("b.go", "Many", 1, "gateway gateway gateway gateway gateway padding words ok"),
        ])
        .unwrap();

    let page = store.search_bm25("gateway", &opts(10, 0)).unwrap();
    assert_eq!(page.hits.len(), 2);
    assert_eq!(page.hits[0].doc.id, "b.go:function:Many:1");
    assert!(page.hits[0].score >= page.hits[1].score);
}

#[test]
fn test_bm25_empty_query_returns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 4, SearchParams::default());
    store.upsert(&doc("a.go", "A", 1, "content")).unwrap();

    let page = store.search_bm25("  !! ", &opts(10, 0)).unwrap();
    assert!(page.hits.is_empty());
    assert_eq!(page.total_matching, 0);
    assert!(!page.has_more);
}

// ============================================================================
// Vector search
// ============================================================================

#[test]
fn test_vector_search_finds_nearest() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 4, SearchParams::default());

    store
        .upsert_batch(&[
            embedded("a.go", "A", 1, "alpha", vec![1.0, 0.0, 0.0, 0.0]),
            embedded("b.go", "B", 1, "beta", vec![0.0, 1.0, 0.0, 0.0]),
            embedded("c.go", "C", 1, "gamma", vec![0.9, 0.1, 0.0, 0.0]),
        ])
        .unwrap();

    let page = store
        .search_vector(&[1.0, 0.0, 0.0, 0.0], &opts(2, 0))
        .unwrap();
    assert_eq!(page.hits.len(), 2);
    assert_eq!(page.hits[0].doc.file_path, "a.go");
    assert_eq!(page.hits[1].doc.file_path, "c.go");
    assert!(page.hits[0].score > page.hits[1].score);
}

#[test]
fn test_vector_search_dimension_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 4, SearchParams::default());
    let err = store.search_vector(&[1.0, 0.0], &opts(5, 0)).unwrap_err();
    assert!(matches!(err, StoreError::DimensionMismatch { .. }));
}

#[test]
fn test_vector_search_skips_unembedded() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 4, SearchParams::default());

    store
        .upsert_batch(&[
            embedded("a.go", "A", 1, "embedded doc", vec![1.0, 0.0, 0.0, 0.0]),
            doc("b.go", "B", 1, "unembedded doc"),
        ])
        .unwrap();

    let page = store
        .search_vector(&[1.0, 0.0, 0.0, 0.0], &opts(10, 0))
        .unwrap();
    assert_eq!(page.hits.len(), 1);
    assert_eq!(page.hits[0].doc.file_path, "a.go");
}

#[test]
fn test_vector_search_deterministic_with_sampling() {
    let dir = tempfile::tempdir().unwrap();
    // Force the sampling path: 400 docs, sample of at most 50.
    let params = SearchParams {
        min_sample: 50,
        sample_multiplier: 2,
        candidate_cutoff: 10,
        ..Default::default()
    };
    let store = open_store(&dir, 16, params);

    let docs: Vec<Document> = (0..400)
        .map(|i| {
            embedded(
                &format!("f{:03}.go", i),
                "F",
                1,
                "vector corpus entry",
                unit_vector(16, i as u64 + 1),
            )
        })
        .collect();
    store.upsert_batch(&docs).unwrap();

    let query = unit_vector(16, 9999);
    let first = store.search_vector(&query, &opts(10, 0)).unwrap();
    let second = store.search_vector(&query, &opts(10, 0)).unwrap();

    assert_eq!(first.hits.len(), second.hits.len());
    for (a, b) in first.hits.iter().zip(second.hits.iter()) {
        assert_eq!(a.doc.id, b.doc.id);
        assert!((a.score - b.score).abs() < 1e-6);
    }
}

#[test]
fn test_vector_search_matches_brute_force_when_sample_covers() {
    let dir = tempfile::tempdir().unwrap();
    // min_sample above N means a full scan: recall 1.0 by construction.
    let params = SearchParams {
        min_sample: 2000,
        ..Default::default()
    };
    let store = open_store(&dir, 16, params);

    let vectors: Vec<Vec<f32>> = (0..500).map(|i| unit_vector(16, i + 1)).collect();
    let docs: Vec<Document> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| embedded(&format!("f{:03}.go", i), "F", 1, "entry", v.clone()))
        .collect();
    store.upsert_batch(&docs).unwrap();

    let query = unit_vector(16, 777);
    let page = store.search_vector(&query, &opts(10, 0)).unwrap();

    // Brute-force reference.
    let dot = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
    let mut expected: Vec<(usize, f32)> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (i, dot(&query, v)))
        .collect();
    expected.sort_by(|a, b| b.1.total_cmp(&a.1));

    for (hit, (idx, score)) in page.hits.iter().zip(expected.iter().take(10)) {
        assert_eq!(hit.doc.file_path, format!("f{:03}.go", idx));
        assert!((hit.score - score).abs() < 1e-4);
    }
}

#[test]
fn test_vector_search_deadline_returns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 4, SearchParams::default());
    store
        .upsert(&embedded("a.go", "A", 1, "x", vec![1.0, 0.0, 0.0, 0.0]))
        .unwrap();

    let options = SearchOptions {
        limit: 5,
        deadline: Some(Instant::now() - Duration::from_millis(1)),
        ..Default::default()
    };
    let err = store
        .search_vector(&[1.0, 0.0, 0.0, 0.0], &options)
        .unwrap_err();
    assert!(matches!(err, StoreError::DeadlineExceeded));
}

#[test]
fn test_search_honors_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 4, SearchParams::default());
    store
        .upsert(&embedded("a.go", "A", 1, "x", vec![1.0, 0.0, 0.0, 0.0]))
        .unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let options = SearchOptions {
        limit: 5,
        cancel: Some(cancel),
        ..Default::default()
    };
    let err = store
        .search_vector(&[1.0, 0.0, 0.0, 0.0], &options)
        .unwrap_err();
    assert!(matches!(err, StoreError::Cancelled));
}

// ============================================================================
// Hybrid fusion
// ============================================================================

#[test]
fn test_hybrid_merges_lexical_and_semantic() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 4, SearchParams::default());

    let mut docs = vec![
        // Literal matches with orthogonal vectors.
        embedded("lit1.go", "L1", 1, "the payment-gateway handler", vec![0.0, 0.0, 1.0, 0.0]),
        embedded("lit2.go", "L2", 1, "payment-gateway retry logic", vec![0.0, 0.0, 0.0, 1.0]),
        // Semantic matches without the literal token.
        embedded("sem1.go", "S1", 1, "charge processing pipeline", vec![0.99, 0.1, 0.0, 0.0]),
        embedded("sem2.go", "S2", 1, "billing reconciliation", vec![0.98, 0.15, 0.0, 0.0]),
    ];
    for i in 0..20 {
        docs.push(embedded(
            &format!("noise{:02}.go", i),
            "N",
            1,
            "completely unrelated text",
            unit_vector(4, 100 + i),
        ));
    }
    store.upsert_batch(&docs).unwrap();

    let page = store
        .search_hybrid("payment gateway", Some(&[1.0, 0.0, 0.0, 0.0]), &opts(6, 0))
        .unwrap();
    assert!(!page.degraded);

    let ids: Vec<&str> = page.hits.iter().map(|h| h.doc.file_path.as_str()).collect();
    assert!(ids.contains(&"lit1.go"));
    assert!(ids.contains(&"lit2.go"));
    assert!(ids.contains(&"sem1.go"));
    assert!(ids.contains(&"sem2.go"));
}

#[test]
fn test_hybrid_without_vector_is_degraded_bm25() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 4, SearchParams::default());
    store
        .upsert(&doc("a.go", "A", 1, "gateway implementation"))
        .unwrap();

    let page = store.search_hybrid("gateway", None, &opts(10, 0)).unwrap();
    assert!(page.degraded);
    assert_eq!(page.hits.len(), 1);
}

#[test]
fn test_hybrid_tie_broken_by_id_then_boost_flips_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 4, SearchParams::default());

    // Near-identical chunks in two files; lib's extra term occurrence
    // makes it the unboosted winner.
    store
        .upsert_batch(&[
            doc("src/auth.go", "Auth", 1, "auth token verification handler"),
            doc("lib/auth.go", "Auth", 1, "auth auth token verification handler"),
        ])
        .unwrap();

    let page = store.search_hybrid("auth", None, &opts(10, 0)).unwrap();
    assert_eq!(page.hits.len(), 2);
    assert_eq!(page.hits[0].doc.file_path, "lib/auth.go");

    // With the work-context boost the active file wins.
    let boosted = SearchOptions {
        limit: 10,
        boosts: Boosts {
            file: Some("src/auth.go".to_string()),
            tickets: vec![],
        },
        ..Default::default()
    };
    let page = store.search_hybrid("auth", None, &boosted).unwrap();
    assert_eq!(page.hits[0].doc.file_path, "src/auth.go");
    assert!(page.hits[0].score > page.hits[1].score);
}

#[test]
fn test_ticket_boost_applies() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 4, SearchParams::default());

    let mut ticketed = doc("a.go", "A", 1, "cache invalidation fix");
    ticketed
        .metadata
        .insert("ticket_ids".to_string(), serde_json::json!(["PROJ-9"]));
    store
        .upsert_batch(&[ticketed, doc("b.go", "B", 1, "cache invalidation fix")])
        .unwrap();

    let options = SearchOptions {
        limit: 10,
        boosts: Boosts {
            file: None,
            tickets: vec!["PROJ-9".to_string()],
        },
        ..Default::default()
    };
    let page = store.search_hybrid("cache invalidation", None, &options).unwrap();
    assert_eq!(page.hits[0].doc.file_path, "a.go");
}

// ============================================================================
// Filters
// ============================================================================

#[test]
fn test_source_type_filter() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 4, SearchParams::default());

    let mut slack = doc("slack/eng/1", "", 1, "deploy pipeline discussion");
    slack
        .metadata
        .insert("source_type".to_string(), serde_json::json!("slack"));
    store
        .upsert_batch(&[slack, doc("src/deploy.go", "Deploy", 1, "deploy pipeline code")])
        .unwrap();

    let options = SearchOptions {
        limit: 10,
        filters: SearchFilters {
            source_types: Some(vec!["slack".to_string()]),
            ..Default::default()
        },
        ..Default::default()
    };
    let page = store.search_hybrid("deploy pipeline", None, &options).unwrap();
    assert_eq!(page.hits.len(), 1);
    assert_eq!(page.hits[0].doc.source_type(), Some("slack"));
}

#[test]
fn test_date_range_filter() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 4, SearchParams::default());
    store.upsert(&doc("a.go", "A", 1, "recent work")).unwrap();

    let mut past = SearchOptions {
        limit: 10,
        ..Default::default()
    };
    past.filters.date_to = Some(chrono::Utc::now() - chrono::Duration::days(1));
    let page = store.search_hybrid("recent work", None, &past).unwrap();
    assert!(page.hits.is_empty());

    let mut current = SearchOptions {
        limit: 10,
        ..Default::default()
    };
    current.filters.date_from = Some(chrono::Utc::now() - chrono::Duration::days(1));
    let page = store.search_hybrid("recent work", None, &current).unwrap();
    assert_eq!(page.hits.len(), 1);
}

#[test]
fn test_git_branch_filter() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 4, SearchParams::default());

    let mut branched = doc("a.go", "A", 1, "feature toggles");
    branched
        .metadata
        .insert("git_branch".to_string(), serde_json::json!("feature/x"));
    store
        .upsert_batch(&[branched, doc("b.go", "B", 1, "feature toggles")])
        .unwrap();

    let options = SearchOptions {
        limit: 10,
        filters: SearchFilters {
            git_branch: Some("feature/x".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    let page = store.search_hybrid("feature toggles", None, &options).unwrap();
    assert_eq!(page.hits.len(), 1);
    assert_eq!(page.hits[0].doc.file_path, "a.go");
}

// ============================================================================
// Pagination
// ============================================================================

#[test]
fn test_pagination_pages_concatenate() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 4, SearchParams::default());

    let docs: Vec<Document> = (0..50)
        .map(|i| {
            doc(
                &format!("f{:02}.go", i),
                "F",
                1,
                &format!("telemetry collector variant {}", i),
            )
        })
        .collect();
    store.upsert_batch(&docs).unwrap();

    let p1 = store.search_bm25("telemetry collector", &opts(10, 0)).unwrap();
    let p2 = store.search_bm25("telemetry collector", &opts(10, 10)).unwrap();
    let all = store.search_bm25("telemetry collector", &opts(20, 0)).unwrap();

    assert_eq!(p1.hits.len(), 10);
    assert_eq!(p2.hits.len(), 10);
    assert!(p1.has_more);

    let ids1: Vec<&str> = p1.hits.iter().map(|h| h.doc.id.as_str()).collect();
    let ids2: Vec<&str> = p2.hits.iter().map(|h| h.doc.id.as_str()).collect();
    assert!(ids1.iter().all(|id| !ids2.contains(id)), "pages overlap");

    let combined: Vec<&str> = ids1.into_iter().chain(ids2).collect();
    let expected: Vec<&str> = all.hits.iter().map(|h| h.doc.id.as_str()).collect();
    assert_eq!(combined, expected);
}

#[test]
fn test_has_more_accounting() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 4, SearchParams::default());
    let docs: Vec<Document> = (0..5)
        .map(|i| doc(&format!("f{}.go", i), "F", 1, "shared marker token"))
        .collect();
    store.upsert_batch(&docs).unwrap();

    let page = store.search_bm25("marker", &opts(3, 0)).unwrap();
    assert_eq!(page.total_matching, 5);
    assert!(page.has_more);

    let page = store.search_bm25("marker", &opts(3, 3)).unwrap();
    assert_eq!(page.hits.len(), 2);
    assert!(!page.has_more);

    let page = store.search_bm25("marker", &opts(3, 10)).unwrap();
    assert!(page.hits.is_empty());
    assert!(!page.has_more);
}

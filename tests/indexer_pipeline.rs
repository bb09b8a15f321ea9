// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end indexing pipeline behavior: incremental runs, state
//! machine rules, cancellation, and resumability.

use std::path::Path;
use std::sync::Arc;

use conexus::config::Config;
use conexus::embeddings::HashingEmbedder;
use conexus::engine::ContextEngine;
use conexus::index::{IndexPhase, StateFile};
use conexus::IndexError;

const DIM: usize = 32;

fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn test_engine(root: &Path, data: &Path) -> ContextEngine {
    let mut config = Config::default();
    config.database.path = data.join("db.sqlite");
    config.indexer.root_path = root.to_path_buf();
    config.indexer.workers = 2;
    config.indexer.batch_size = 10;
    config.indexer.checkpoint_interval_ms = 50;
    config.indexer.stop_grace_ms = 2000;
    config.embedding.dimension = DIM;
    ContextEngine::with_embedder(config, Arc::new(HashingEmbedder::new(DIM))).unwrap()
}

async fn run_to_completion(engine: &ContextEngine) {
    engine.controller().start(Default::default()).unwrap();
    engine.controller().wait_until_idle().await;
}

fn all_ids(engine: &ContextEngine, files: &[&str]) -> Vec<String> {
    let mut ids = Vec::new();
    for file in files {
        for doc in engine.store().find_by_file(file, 1000).unwrap() {
            ids.push(format!("{}#{}", doc.id, doc.content_hash));
        }
    }
    ids.sort();
    ids
}

const GO_A: &str = "package a\n\nfunc Alpha() int {\n\treturn 1\n}\n\nfunc Beta() int {\n\treturn 2\n}\n";

#[tokio::test]
async fn test_initial_index_builds_store_and_state() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_file(root.path(), "a.go", GO_A);
    write_file(root.path(), "lib/b.rs", "pub fn bravo() -> u32 {\n    2\n}\n");
    write_file(root.path(), "notes.txt", "free form notes about the project\n");

    let engine = test_engine(root.path(), data.path());
    run_to_completion(&engine).await;

    let status = engine.controller().status();
    assert!(!status.is_indexing);
    assert_eq!(status.phase, IndexPhase::Idle);
    assert_eq!(status.files_processed, 3);
    assert!(status.last_error.is_none());
    assert!(engine.store().count().unwrap() > 0);

    // Chunk ids follow the path:type:symbol:line scheme.
    let a_docs = engine.store().find_by_file("a.go", 100).unwrap();
    assert!(a_docs.iter().any(|d| d.id == "a.go:function:Alpha:3"));
    assert!(a_docs.iter().any(|d| d.id == "a.go:function:Beta:7"));

    // Every chunk got an embedding from the injected embedder.
    for doc in &a_docs {
        let full = engine.store().get(&doc.id).unwrap().unwrap();
        assert_eq!(full.embedding.map(|e| e.len()), Some(DIM));
    }

    // State file persisted with hashes and a root hash.
    let state = StateFile::new(engine.config().indexer_state_path())
        .load()
        .unwrap();
    assert_eq!(state.file_hashes.len(), 3);
    assert!(!state.root_hash.is_empty());
    assert!(state.last_full_index.is_some());
}

#[tokio::test]
async fn test_incremental_reindex_applies_changes_only() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_file(root.path(), "a.go", GO_A);
    write_file(root.path(), "c.txt", "doomed file\n");

    let engine = test_engine(root.path(), data.path());
    run_to_completion(&engine).await;

    let state_before = StateFile::new(engine.config().indexer_state_path())
        .load()
        .unwrap();
    let a_before = engine.store().find_by_file("a.go", 100).unwrap();

    // Modify a.go, add b.go, delete c.txt.
    write_file(
        root.path(),
        "a.go",
        "package a\n\nfunc Alpha() int {\n\treturn 100\n}\n\nfunc Beta() int {\n\treturn 2\n}\n",
    );
    write_file(root.path(), "b.go", "package b\n\nfunc Gamma() {}\n");
    std::fs::remove_file(root.path().join("c.txt")).unwrap();

    run_to_completion(&engine).await;

    // b.go gained chunks, c.txt lost them, a.go was replaced.
    assert!(!engine.store().find_by_file("b.go", 100).unwrap().is_empty());
    assert!(engine.store().find_by_file("c.txt", 100).unwrap().is_empty());

    let a_after = engine.store().find_by_file("a.go", 100).unwrap();
    assert_eq!(a_after.len(), a_before.len());
    let alpha = a_after
        .iter()
        .find(|d| d.id == "a.go:function:Alpha:3")
        .unwrap();
    assert!(alpha.content.contains("100"));

    let state_after = StateFile::new(engine.config().indexer_state_path())
        .load()
        .unwrap();
    assert_ne!(state_before.root_hash, state_after.root_hash);
    assert!(!state_after.file_hashes.contains_key("c.txt"));
    assert!(state_after.file_hashes.contains_key("b.go"));
}

#[tokio::test]
async fn test_unchanged_rerun_is_a_noop() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_file(root.path(), "a.go", GO_A);

    let engine = test_engine(root.path(), data.path());
    run_to_completion(&engine).await;
    let count = engine.store().count().unwrap();
    let root_hash = StateFile::new(engine.config().indexer_state_path())
        .load()
        .unwrap()
        .root_hash;

    run_to_completion(&engine).await;
    let status = engine.controller().status();
    assert_eq!(status.total_files, 0);
    assert_eq!(engine.store().count().unwrap(), count);
    assert_eq!(
        StateFile::new(engine.config().indexer_state_path())
            .load()
            .unwrap()
            .root_hash,
        root_hash
    );
}

#[tokio::test]
async fn test_force_reindex_rebuilds_everything() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_file(root.path(), "a.go", GO_A);

    let engine = test_engine(root.path(), data.path());
    run_to_completion(&engine).await;

    engine.controller().force_reindex().unwrap();
    engine.controller().wait_until_idle().await;

    let status = engine.controller().status();
    assert_eq!(status.files_processed, 1);
    assert!(engine
        .store()
        .find_by_file("a.go", 100)
        .unwrap()
        .iter()
        .any(|d| d.id == "a.go:function:Alpha:3"));
}

#[tokio::test]
async fn test_reindex_paths_restricts_scope() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_file(root.path(), "a.go", GO_A);
    write_file(root.path(), "b.go", "package b\n\nfunc Gamma() {}\n");

    let engine = test_engine(root.path(), data.path());
    run_to_completion(&engine).await;

    // Touch both, reindex only a.go.
    write_file(root.path(), "a.go", GO_A.replace("return 1", "return 9").as_str());
    write_file(root.path(), "b.go", "package b\n\nfunc Gamma() { changed() }\n");

    engine
        .controller()
        .reindex_paths(vec!["a.go".to_string()])
        .unwrap();
    engine.controller().wait_until_idle().await;

    let alpha = engine.store().get("a.go:function:Alpha:3").unwrap().unwrap();
    assert!(alpha.content.contains("return 9"));
    let gamma = engine.store().find_by_file("b.go", 100).unwrap();
    assert!(gamma.iter().all(|d| !d.content.contains("changed")));
}

#[tokio::test]
async fn test_reindex_paths_rejects_escape() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_file(root.path(), "a.go", GO_A);

    let engine = test_engine(root.path(), data.path());
    let err = engine
        .controller()
        .reindex_paths(vec!["../outside.go".to_string()])
        .unwrap_err();
    assert!(matches!(err, IndexError::PathOutsideRoot(_)));
    assert!(!engine.controller().is_running());
}

#[tokio::test]
async fn test_concurrent_start_conflicts_and_stop_from_idle_is_noop() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    for i in 0..100 {
        write_file(
            root.path(),
            &format!("src/file{:03}.rs", i),
            &format!("pub fn handler_{}() -> u32 {{\n    {}\n}}\n", i, i),
        );
    }

    let engine = test_engine(root.path(), data.path());

    // Stop while idle: no-op.
    engine.controller().stop().await.unwrap();
    assert_eq!(engine.controller().status().phase, IndexPhase::Idle);

    engine.controller().start(Default::default()).unwrap();
    let second = engine.controller().start(Default::default());
    assert!(matches!(second, Err(IndexError::AlreadyRunning)));

    // Status stays readable mid-run.
    let status = engine.controller().status();
    assert!(status.is_indexing);

    engine.controller().wait_until_idle().await;
    assert_eq!(engine.controller().status().phase, IndexPhase::Idle);
}

#[tokio::test]
async fn test_cancellation_leaves_consistent_state() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let mut files = Vec::new();
    for i in 0..200 {
        let rel = format!("src/file{:03}.rs", i);
        write_file(
            root.path(),
            &rel,
            &format!("pub fn handler_{}() -> u32 {{\n    compute({})\n}}\n", i, i),
        );
        files.push(rel);
    }

    let engine = test_engine(root.path(), data.path());
    engine.controller().start(Default::default()).unwrap();
    engine.controller().stop().await.unwrap();

    let status = engine.controller().status();
    assert!(!status.is_indexing);
    assert_eq!(status.phase, IndexPhase::Idle);

    // Whatever was committed is whole files: a file either has all of
    // its chunks in the store and its hash in the state, or neither.
    let state = StateFile::new(engine.config().indexer_state_path())
        .load()
        .unwrap();
    for rel in &files {
        let chunks = engine.store().find_by_file(rel, 1000).unwrap();
        if state.file_hashes.contains_key(rel) {
            assert!(!chunks.is_empty(), "{} committed without chunks", rel);
        } else {
            assert!(chunks.is_empty(), "{} has partial chunks", rel);
        }
    }
}

#[tokio::test]
async fn test_resume_after_cancel_matches_uninterrupted_run() {
    let root = tempfile::tempdir().unwrap();
    let mut files = Vec::new();
    for i in 0..120 {
        let rel = format!("src/file{:03}.rs", i);
        write_file(
            root.path(),
            &rel,
            &format!("pub fn handler_{}() -> u32 {{\n    compute({})\n}}\n", i, i),
        );
        files.push(rel);
    }
    let file_refs: Vec<&str> = files.iter().map(String::as_str).collect();

    // Interrupted store: cancel mid-run, then finish with a second run.
    let data_a = tempfile::tempdir().unwrap();
    let engine_a = test_engine(root.path(), data_a.path());
    engine_a.controller().start(Default::default()).unwrap();
    engine_a.controller().stop().await.unwrap();
    run_to_completion(&engine_a).await;

    // Reference store: one uninterrupted run.
    let data_b = tempfile::tempdir().unwrap();
    let engine_b = test_engine(root.path(), data_b.path());
    run_to_completion(&engine_b).await;

    assert_eq!(
        all_ids(&engine_a, &file_refs),
        all_ids(&engine_b, &file_refs)
    );
    assert_eq!(
        engine_a.store().count().unwrap(),
        engine_b.store().count().unwrap()
    );
}

#[tokio::test]
async fn test_walker_skips_flow_into_run() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_file(root.path(), "a.go", GO_A);
    write_file(root.path(), ".gitignore", "generated/\n");
    write_file(root.path(), "generated/out.go", "package gen\n");
    std::fs::write(root.path().join("blob.bin"), b"\x00\x01\x02").unwrap();

    let engine = test_engine(root.path(), data.path());
    run_to_completion(&engine).await;

    assert!(engine
        .store()
        .find_by_file("generated/out.go", 10)
        .unwrap()
        .is_empty());
    assert!(engine.store().find_by_file("blob.bin", 10).unwrap().is_empty());
    assert!(!engine.store().find_by_file("a.go", 10).unwrap().is_empty());
}

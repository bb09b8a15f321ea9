// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON-RPC surface behavior: framing errors, tool dispatch, validation,
//! and the four context tools end to end.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};

use conexus::config::Config;
use conexus::embeddings::HashingEmbedder;
use conexus::engine::ContextEngine;
use conexus::server::handle_line;
use conexus::types::{ChunkType, Document};

const DIM: usize = 16;

fn engine_with_corpus(root: &Path, data: &Path) -> Arc<ContextEngine> {
    let mut config = Config::default();
    config.database.path = data.join("db.sqlite");
    config.indexer.root_path = root.to_path_buf();
    config.embedding.dimension = DIM;
    let engine =
        ContextEngine::with_embedder(config, Arc::new(HashingEmbedder::new(DIM))).unwrap();

    let docs: Vec<Document> = (0..5)
        .map(|i| {
            Document::new(
                format!("fn route_{}() {{ dispatch(request) }}", i),
                format!("src/routes_{}.rs", i),
                "rust".to_string(),
                ChunkType::Function,
                &format!("route_{}", i),
                1,
                3,
            )
        })
        .collect();
    engine.store().upsert_batch(&docs).unwrap();

    Arc::new(engine)
}

async fn call(engine: &Arc<ContextEngine>, line: &str) -> Value {
    serde_json::to_value(handle_line(engine, line).await).unwrap()
}

async fn call_tool(engine: &Arc<ContextEngine>, name: &str, arguments: Value) -> Value {
    let line = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": { "name": name, "arguments": arguments }
    })
    .to_string();
    call(engine, &line).await
}

// ============================================================================
// Framing
// ============================================================================

#[tokio::test]
async fn test_parse_error() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let engine = engine_with_corpus(root.path(), data.path());

    let resp = call(&engine, "{ not json").await;
    assert_eq!(resp["error"]["code"], -32700);
    assert_eq!(resp["id"], Value::Null);
}

#[tokio::test]
async fn test_invalid_request_version() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let engine = engine_with_corpus(root.path(), data.path());

    let resp = call(&engine, r#"{"jsonrpc":"1.0","id":4,"method":"tools/list"}"#).await;
    assert_eq!(resp["error"]["code"], -32600);
    assert_eq!(resp["id"], 4);
}

#[tokio::test]
async fn test_method_not_found() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let engine = engine_with_corpus(root.path(), data.path());

    let resp = call(&engine, r#"{"jsonrpc":"2.0","id":2,"method":"nope"}"#).await;
    assert_eq!(resp["error"]["code"], -32601);
}

#[tokio::test]
async fn test_tools_list() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let engine = engine_with_corpus(root.path(), data.path());

    let resp = call(&engine, r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#).await;
    let tools = resp["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(
        names,
        vec![
            "context_search",
            "context_get_related_info",
            "context_index_control",
            "context_connector_management"
        ]
    );
    for tool in tools {
        assert!(tool["inputSchema"]["type"] == "object");
        assert!(tool["description"].as_str().unwrap().len() > 10);
    }
}

#[tokio::test]
async fn test_unknown_tool() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let engine = engine_with_corpus(root.path(), data.path());

    let resp = call_tool(&engine, "context_nope", json!({})).await;
    assert_eq!(resp["error"]["code"], -32601);
}

// ============================================================================
// context_search
// ============================================================================

#[tokio::test]
async fn test_search_requires_query() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let engine = engine_with_corpus(root.path(), data.path());

    let resp = call_tool(&engine, "context_search", json!({})).await;
    assert_eq!(resp["error"]["code"], -32602);

    let resp = call_tool(&engine, "context_search", json!({"query": "   "})).await;
    assert_eq!(resp["error"]["code"], -32602);
}

#[tokio::test]
async fn test_search_validates_top_k() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let engine = engine_with_corpus(root.path(), data.path());

    let resp = call_tool(
        &engine,
        "context_search",
        json!({"query": "dispatch", "top_k": 0}),
    )
    .await;
    assert_eq!(resp["error"]["code"], -32602);

    let resp = call_tool(
        &engine,
        "context_search",
        json!({"query": "dispatch", "top_k": 101}),
    )
    .await;
    assert_eq!(resp["error"]["code"], -32602);
}

#[tokio::test]
async fn test_search_returns_ranked_results() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let engine = engine_with_corpus(root.path(), data.path());

    let resp = call_tool(
        &engine,
        "context_search",
        json!({"query": "dispatch request", "top_k": 3}),
    )
    .await;
    let result = &resp["result"];
    assert!(resp.get("error").is_none());

    let results = result["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(result["limit"], 3);
    assert_eq!(result["offset"], 0);
    assert_eq!(result["has_more"], true);
    assert_eq!(result["total_count"], 5);
    assert!(result["query_time"].as_f64().unwrap() >= 0.0);

    let first = &results[0];
    assert!(first["id"].as_str().unwrap().contains(":function:"));
    assert_eq!(first["source_type"], "file");
    assert!(first["score"].as_f64().unwrap() > 0.0);
    assert!(first["metadata"]["file_path"].as_str().unwrap().starts_with("src/"));
}

#[tokio::test]
async fn test_search_invalid_date_filter() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let engine = engine_with_corpus(root.path(), data.path());

    let resp = call_tool(
        &engine,
        "context_search",
        json!({
            "query": "dispatch",
            "filters": { "date_range": { "from": "yesterday" } }
        }),
    )
    .await;
    assert_eq!(resp["error"]["code"], -32602);
}

// ============================================================================
// context_get_related_info
// ============================================================================

#[tokio::test]
async fn test_related_info_requires_exactly_one_selector() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let engine = engine_with_corpus(root.path(), data.path());

    let resp = call_tool(&engine, "context_get_related_info", json!({})).await;
    assert_eq!(resp["error"]["code"], -32602);

    let resp = call_tool(
        &engine,
        "context_get_related_info",
        json!({"file_path": "src/a.rs", "ticket_id": "PROJ-1"}),
    )
    .await;
    assert_eq!(resp["error"]["code"], -32602);
}

#[tokio::test]
async fn test_related_info_for_ticket() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let engine = engine_with_corpus(root.path(), data.path());

    let mut doc = Document::new(
        "fix the dispatcher race".to_string(),
        "src/fix.rs".to_string(),
        "rust".to_string(),
        ChunkType::Function,
        "fix",
        1,
        2,
    );
    doc.metadata
        .insert("ticket_ids".to_string(), json!(["PROJ-42"]));
    engine.store().upsert(&doc).unwrap();

    let resp = call_tool(
        &engine,
        "context_get_related_info",
        json!({"ticket_id": "PROJ-42"}),
    )
    .await;
    let result = &resp["result"];
    assert!(result["summary"].as_str().unwrap().contains("PROJ-42"));
    let items = result["related_items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["file_path"], "src/fix.rs");
}

// ============================================================================
// context_index_control
// ============================================================================

#[tokio::test]
async fn test_index_control_status() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let engine = engine_with_corpus(root.path(), data.path());

    let resp = call_tool(&engine, "context_index_control", json!({"action": "status"})).await;
    let result = &resp["result"];
    assert_eq!(result["status"], "ok");
    assert_eq!(result["details"]["documents_indexed"], 5);
    assert_eq!(result["details"]["indexer_available"], true);
    assert_eq!(result["index_status"]["is_indexing"], false);
    assert_eq!(result["index_status"]["phase"], "idle");
}

#[tokio::test]
async fn test_index_control_unknown_action() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let engine = engine_with_corpus(root.path(), data.path());

    let resp = call_tool(&engine, "context_index_control", json!({"action": "pause"})).await;
    assert_eq!(resp["error"]["code"], -32602);
}

#[tokio::test]
async fn test_index_control_reindex_paths_validation() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let engine = engine_with_corpus(root.path(), data.path());

    let resp = call_tool(
        &engine,
        "context_index_control",
        json!({"action": "reindex_paths"}),
    )
    .await;
    assert_eq!(resp["error"]["code"], -32602);

    let resp = call_tool(
        &engine,
        "context_index_control",
        json!({"action": "reindex_paths", "paths": ["../etc/passwd"]}),
    )
    .await;
    assert_eq!(resp["error"]["code"], -32602);
}

#[tokio::test]
async fn test_index_control_start_conflict_is_reported() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    for i in 0..50 {
        std::fs::write(
            root.path().join(format!("file{:02}.rs", i)),
            format!("pub fn f{}() {{}}\n", i),
        )
        .unwrap();
    }
    let engine = engine_with_corpus(root.path(), data.path());

    let resp = call_tool(&engine, "context_index_control", json!({"action": "start"})).await;
    assert_eq!(resp["result"]["status"], "ok");

    // A second start while running reports a conflict in the result, not
    // a protocol error.
    let resp = call_tool(&engine, "context_index_control", json!({"action": "start"})).await;
    let result = &resp["result"];
    if result["status"] == "error" {
        assert!(result["message"].as_str().unwrap().contains("already"));
    } else {
        // The first run may already have finished on a fast machine.
        assert_eq!(result["status"], "ok");
    }

    engine.controller().wait_until_idle().await;
    let resp = call_tool(&engine, "context_index_control", json!({"action": "stop"})).await;
    assert_eq!(resp["result"]["status"], "ok");
}

// ============================================================================
// context_connector_management
// ============================================================================

#[tokio::test]
async fn test_connector_lifecycle_over_rpc() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let engine = engine_with_corpus(root.path(), data.path());

    let resp = call_tool(
        &engine,
        "context_connector_management",
        json!({"action": "list"}),
    )
    .await;
    assert_eq!(resp["result"]["connectors"].as_array().unwrap().len(), 0);

    let resp = call_tool(
        &engine,
        "context_connector_management",
        json!({
            "action": "add",
            "connector_id": "gh-main",
            "connector_config": {
                "type": "github",
                "name": "main repo",
                "config": { "org": "acme", "repo": "api" }
            }
        }),
    )
    .await;
    assert_eq!(resp["result"]["status"], "ok");

    // Duplicate id: conflict in the result payload.
    let resp = call_tool(
        &engine,
        "context_connector_management",
        json!({
            "action": "add",
            "connector_id": "gh-main",
            "connector_config": { "type": "github" }
        }),
    )
    .await;
    assert_eq!(resp["result"]["status"], "error");

    let resp = call_tool(
        &engine,
        "context_connector_management",
        json!({
            "action": "update",
            "connector_id": "gh-main",
            "connector_config": { "branch": "main" }
        }),
    )
    .await;
    assert_eq!(resp["result"]["status"], "ok");
    assert_eq!(
        resp["result"]["connectors"][0]["config"]["branch"],
        "main"
    );

    let resp = call_tool(
        &engine,
        "context_connector_management",
        json!({"action": "remove", "connector_id": "gh-main"}),
    )
    .await;
    assert_eq!(resp["result"]["status"], "ok");

    let resp = call_tool(
        &engine,
        "context_connector_management",
        json!({"action": "remove", "connector_id": "gh-main"}),
    )
    .await;
    assert_eq!(resp["result"]["status"], "error");
}

#[tokio::test]
async fn test_connector_add_requires_type() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let engine = engine_with_corpus(root.path(), data.path());

    let resp = call_tool(
        &engine,
        "context_connector_management",
        json!({"action": "add", "connector_config": { "name": "missing type" }}),
    )
    .await;
    assert_eq!(resp["error"]["code"], -32602);
}

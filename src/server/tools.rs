// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The context tools: descriptors, request structs, and dispatch.
//!
//! Tool arguments deserialize into a closed set of request structs and
//! are validated at this boundary; invalid input never reaches the core.
//! Unknown tools are a method-not-found error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::connectors::{ConnectorRecord, ConnectorStatus};
use crate::engine::{ContextEngine, SearchRequest};
use crate::error::IndexError;
use crate::store::{Boosts, SearchFilters};

use super::rpc::JsonRpcError;

/// Static descriptors for `tools/list`.
pub fn tool_descriptors() -> Value {
    json!([
        {
            "name": "context_search",
            "description": "Hybrid semantic + lexical search over the indexed corpus",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "top_k": { "type": "integer", "minimum": 1, "maximum": 100, "default": 20 },
                    "offset": { "type": "integer", "minimum": 0, "default": 0 },
                    "filters": {
                        "type": "object",
                        "properties": {
                            "source_types": { "type": "array", "items": { "type": "string" } },
                            "date_range": {
                                "type": "object",
                                "properties": {
                                    "from": { "type": "string", "format": "date-time" },
                                    "to": { "type": "string", "format": "date-time" }
                                }
                            },
                            "work_context": {
                                "type": "object",
                                "properties": {
                                    "active_file": { "type": "string" },
                                    "git_branch": { "type": "string" },
                                    "open_ticket_ids": { "type": "array", "items": { "type": "string" } }
                                }
                            }
                        }
                    },
                    "work_context": {
                        "type": "object",
                        "properties": {
                            "active_file": { "type": "string" },
                            "git_branch": { "type": "string" },
                            "open_ticket_ids": { "type": "array", "items": { "type": "string" } }
                        }
                    }
                },
                "required": ["query"]
            }
        },
        {
            "name": "context_get_related_info",
            "description": "Related PRs, issues, discussions, and chunks for a file or ticket",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file_path": { "type": "string" },
                    "ticket_id": { "type": "string" }
                }
            }
        },
        {
            "name": "context_index_control",
            "description": "Start, stop, and inspect the background indexer",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["start", "stop", "status", "force_reindex", "reindex_paths"]
                    },
                    "paths": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["action"]
            }
        },
        {
            "name": "context_connector_management",
            "description": "List, add, update, and remove external source connectors",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["list", "add", "update", "remove"] },
                    "connector_id": { "type": "string" },
                    "connector_config": { "type": "object" }
                },
                "required": ["action"]
            }
        }
    ])
}

#[derive(Debug, Deserialize)]
struct WorkContextParams {
    active_file: Option<String>,
    git_branch: Option<String>,
    #[serde(default)]
    open_ticket_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DateRangeParams {
    from: Option<String>,
    to: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FilterParams {
    source_types: Option<Vec<String>>,
    date_range: Option<DateRangeParams>,
    work_context: Option<WorkContextParams>,
}

#[derive(Debug, Deserialize)]
struct ContextSearchParams {
    query: String,
    top_k: Option<usize>,
    offset: Option<usize>,
    filters: Option<FilterParams>,
    work_context: Option<WorkContextParams>,
}

#[derive(Debug, Deserialize)]
struct RelatedInfoParams {
    file_path: Option<String>,
    ticket_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IndexControlParams {
    action: String,
    paths: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ConnectorManagementParams {
    action: String,
    connector_id: Option<String>,
    connector_config: Option<Value>,
}

/// Dispatch one `tools/call` to the named tool.
pub async fn dispatch_tool(
    engine: &Arc<ContextEngine>,
    name: &str,
    arguments: Value,
) -> Result<Value, JsonRpcError> {
    match name {
        "context_search" => context_search(engine, arguments).await,
        "context_get_related_info" => related_info(engine, arguments).await,
        "context_index_control" => index_control(engine, arguments).await,
        "context_connector_management" => connector_management(engine, arguments),
        other => Err(JsonRpcError::method_not_found(other)),
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, JsonRpcError> {
    serde_json::from_value(arguments)
        .map_err(|e| JsonRpcError::invalid_params(format!("invalid arguments: {}", e)))
}

fn parse_date(field: &str, value: &str) -> Result<DateTime<Utc>, JsonRpcError> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| JsonRpcError::invalid_params(format!("invalid {}: {}", field, e)))
}

async fn context_search(
    engine: &Arc<ContextEngine>,
    arguments: Value,
) -> Result<Value, JsonRpcError> {
    let params: ContextSearchParams = parse_args(arguments)?;
    if params.query.trim().is_empty() {
        return Err(JsonRpcError::invalid_params("query must not be empty"));
    }

    let config = engine.config();
    let top_k = params.top_k.unwrap_or(config.search.default_top_k);
    if top_k == 0 || top_k > config.search.max_top_k {
        return Err(JsonRpcError::invalid_params(format!(
            "top_k must be in 1..={}",
            config.search.max_top_k
        )));
    }
    let offset = params.offset.unwrap_or(0);

    let mut filters = SearchFilters::default();
    if let Some(filter_params) = &params.filters {
        filters.source_types = filter_params.source_types.clone();
        if let Some(range) = &filter_params.date_range {
            if let Some(from) = &range.from {
                filters.date_from = Some(parse_date("date_range.from", from)?);
            }
            if let Some(to) = &range.to {
                filters.date_to = Some(parse_date("date_range.to", to)?);
            }
        }
        if let Some(wc) = &filter_params.work_context {
            filters.git_branch = wc.git_branch.clone();
            filters.file_path = wc.active_file.as_ref().map(|f| {
                engine
                    .controller()
                    .validator()
                    .relativize(std::path::Path::new(f))
                    .unwrap_or_else(|_| f.clone())
            });
            if !wc.open_ticket_ids.is_empty() {
                filters.ticket_ids = Some(wc.open_ticket_ids.clone());
            }
        }
    }

    // Request-level work context boosts; the filter-level work context
    // above narrows, this one only re-ranks.
    let mut boosts = Boosts::default();
    if let Some(wc) = &params.work_context {
        boosts.file = wc.active_file.as_ref().map(|f| {
            engine
                .controller()
                .validator()
                .relativize(std::path::Path::new(f))
                .unwrap_or_else(|_| f.clone())
        });
        boosts.tickets = wc.open_ticket_ids.clone();
    }

    let query = params.query.clone();
    let response = engine
        .search(SearchRequest {
            query: params.query,
            top_k,
            offset,
            filters,
            boosts,
            deadline: None,
        })
        .await?;

    let mut results: Vec<Value> = response
        .results
        .iter()
        .map(|hit| {
            json!({
                "id": hit.doc.id,
                "content": hit.doc.content,
                "score": hit.score,
                "source_type": hit.doc.source_type().unwrap_or("file"),
                "metadata": {
                    "file_path": hit.doc.file_path,
                    "language": hit.doc.language,
                    "chunk_type": hit.doc.chunk_type.as_str(),
                    "start_line": hit.doc.start_line,
                    "end_line": hit.doc.end_line,
                    "extra": hit.doc.metadata,
                }
            })
        })
        .collect();

    // Connector results concatenate after local hits; rank fusion with
    // the local lists stays inside the store.
    for item in engine.connectors().search_all(&query, top_k).await {
        results.push(json!({
            "id": item.id,
            "content": item.content,
            "score": item.score,
            "source_type": item.source_type,
            "metadata": { "title": item.title, "extra": item.metadata },
        }));
    }

    Ok(json!({
        "results": results,
        "total_count": response.total_count,
        "query_time": response.query_time_ms,
        "offset": response.offset,
        "limit": response.limit,
        "has_more": response.has_more,
        "degraded": response.degraded,
    }))
}

async fn related_info(
    engine: &Arc<ContextEngine>,
    arguments: Value,
) -> Result<Value, JsonRpcError> {
    let params: RelatedInfoParams = parse_args(arguments)?;
    let info = engine
        .related_info(params.file_path, params.ticket_id)
        .await?;
    serde_json::to_value(info).map_err(|e| JsonRpcError::internal(e.to_string()))
}

async fn index_control(
    engine: &Arc<ContextEngine>,
    arguments: Value,
) -> Result<Value, JsonRpcError> {
    let params: IndexControlParams = parse_args(arguments)?;
    let controller = engine.controller();

    let started = |message: &str| {
        json!({ "status": "ok", "message": message })
    };
    let conflict = |e: IndexError| {
        json!({ "status": "error", "message": e.to_string() })
    };

    match params.action.as_str() {
        "start" => Ok(match controller.start(Default::default()) {
            Ok(()) => started("indexing started"),
            Err(e @ IndexError::AlreadyRunning) => conflict(e),
            Err(e) => return Err(crate::error::EngineError::Index(e).into()),
        }),
        "force_reindex" => Ok(match controller.force_reindex() {
            Ok(()) => started("full reindex started"),
            Err(e @ IndexError::AlreadyRunning) => conflict(e),
            Err(e) => return Err(crate::error::EngineError::Index(e).into()),
        }),
        "reindex_paths" => {
            let paths = params
                .paths
                .filter(|p| !p.is_empty())
                .ok_or_else(|| JsonRpcError::invalid_params("reindex_paths requires paths"))?;
            Ok(match controller.reindex_paths(paths) {
                Ok(()) => started("path reindex started"),
                Err(e @ IndexError::AlreadyRunning) => conflict(e),
                Err(e @ IndexError::PathOutsideRoot(_)) => {
                    return Err(JsonRpcError::invalid_params(e.to_string()))
                }
                Err(e) => return Err(crate::error::EngineError::Index(e).into()),
            })
        }
        "stop" => {
            controller
                .stop()
                .await
                .map_err(|e| JsonRpcError::from(crate::error::EngineError::Index(e)))?;
            Ok(json!({ "status": "ok", "message": "indexing stopped" }))
        }
        "status" => {
            let status = controller.status();
            let documents = engine.store().count().unwrap_or(0);
            let mut index_status = serde_json::to_value(&status)
                .map_err(|e| JsonRpcError::internal(e.to_string()))?;
            #[cfg(feature = "telemetry")]
            {
                index_status["metrics"] =
                    json!(crate::telemetry::metrics::GLOBAL_METRICS.counters_snapshot());
            }
            Ok(json!({
                "status": "ok",
                "message": format!("indexer is {}", status.phase),
                "details": {
                    "documents_indexed": documents,
                    "indexer_available": true,
                },
                "index_status": index_status,
            }))
        }
        other => Err(JsonRpcError::invalid_params(format!(
            "unknown action: {}",
            other
        ))),
    }
}

fn connector_management(
    engine: &Arc<ContextEngine>,
    arguments: Value,
) -> Result<Value, JsonRpcError> {
    let params: ConnectorManagementParams = parse_args(arguments)?;
    let registry = engine.connectors();

    match params.action.as_str() {
        "list" => {
            let connectors = registry
                .list()
                .map_err(|e| JsonRpcError::from(crate::error::EngineError::Connector(e)))?;
            Ok(json!({
                "status": "ok",
                "message": format!("{} connectors", connectors.len()),
                "connectors": connectors,
            }))
        }
        "add" => {
            let config = params
                .connector_config
                .ok_or_else(|| JsonRpcError::invalid_params("add requires connector_config"))?;
            let record = record_from_config(params.connector_id, config)?;
            match registry.add(record) {
                Ok(added) => Ok(json!({
                    "status": "ok",
                    "message": format!("connector {} added", added.id),
                    "connectors": [added],
                })),
                Err(e @ crate::error::ConnectorError::Duplicate(_)) => Ok(json!({
                    "status": "error",
                    "message": e.to_string(),
                })),
                Err(e) => Err(crate::error::EngineError::Connector(e).into()),
            }
        }
        "update" => {
            let id = params
                .connector_id
                .ok_or_else(|| JsonRpcError::invalid_params("update requires connector_id"))?;
            let config = params
                .connector_config
                .and_then(|v| serde_json::from_value(v).ok())
                .ok_or_else(|| {
                    JsonRpcError::invalid_params("update requires a connector_config object")
                })?;
            match registry.update(&id, config) {
                Ok(updated) => Ok(json!({
                    "status": "ok",
                    "message": format!("connector {} updated", updated.id),
                    "connectors": [updated],
                })),
                Err(e @ crate::error::ConnectorError::NotFound(_)) => Ok(json!({
                    "status": "error",
                    "message": e.to_string(),
                })),
                Err(e) => Err(crate::error::EngineError::Connector(e).into()),
            }
        }
        "remove" => {
            let id = params
                .connector_id
                .ok_or_else(|| JsonRpcError::invalid_params("remove requires connector_id"))?;
            let removed = registry
                .remove(&id)
                .map_err(|e| JsonRpcError::from(crate::error::EngineError::Connector(e)))?;
            if removed {
                Ok(json!({ "status": "ok", "message": format!("connector {} removed", id) }))
            } else {
                Ok(json!({ "status": "error", "message": format!("connector not found: {}", id) }))
            }
        }
        other => Err(JsonRpcError::invalid_params(format!(
            "unknown action: {}",
            other
        ))),
    }
}

/// Build a connector record from the opaque `connector_config` payload.
fn record_from_config(
    connector_id: Option<String>,
    config: Value,
) -> Result<ConnectorRecord, JsonRpcError> {
    let obj = config
        .as_object()
        .ok_or_else(|| JsonRpcError::invalid_params("connector_config must be an object"))?;

    let kind = obj
        .get("type")
        .or_else(|| obj.get("kind"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| JsonRpcError::invalid_params("connector_config.type is required"))?
        .to_string();
    let name = obj
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or(kind.as_str())
        .to_string();
    let status = obj
        .get("status")
        .and_then(|v| v.as_str())
        .map(ConnectorStatus::from_str)
        .unwrap_or(ConnectorStatus::Active);
    let extra = obj
        .get("config")
        .and_then(|v| v.as_object())
        .map(|m| m.clone().into_iter().collect())
        .unwrap_or_default();

    Ok(ConnectorRecord {
        id: connector_id.unwrap_or_default(),
        kind,
        name,
        status,
        config: extra,
    })
}

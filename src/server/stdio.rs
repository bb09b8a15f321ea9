// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Newline-delimited JSON-RPC over stdin/stdout.
//!
//! One request per line in, one response per line out. Tool calls run on
//! a spawned task so a panic inside a handler is contained and surfaced
//! as an internal error instead of taking the server down.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::engine::ContextEngine;

use super::rpc::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, INVALID_REQUEST, PARSE_ERROR,
};
use super::tools::{dispatch_tool, tool_descriptors};

/// Serve until stdin closes.
pub async fn run_stdio(engine: Arc<ContextEngine>) -> crate::error::Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    tracing::info!("serving JSON-RPC on stdio");
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(&engine, &line).await;
        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.flush().await?;
    }

    tracing::info!("stdin closed, shutting down");
    engine.close().await;
    Ok(())
}

/// Handle one raw request line.
pub async fn handle_line(engine: &Arc<ContextEngine>, line: &str) -> JsonRpcResponse {
    let parsed: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return JsonRpcResponse::failure(
                Value::Null,
                JsonRpcError::new(PARSE_ERROR, format!("parse error: {}", e)),
            );
        }
    };

    let id = parsed.get("id").cloned().unwrap_or(Value::Null);
    let request: JsonRpcRequest = match serde_json::from_value(parsed) {
        Ok(r) => r,
        Err(e) => {
            return JsonRpcResponse::failure(
                id,
                JsonRpcError::new(INVALID_REQUEST, format!("invalid request: {}", e)),
            );
        }
    };
    if request.jsonrpc != "2.0" {
        return JsonRpcResponse::failure(
            id,
            JsonRpcError::new(INVALID_REQUEST, "jsonrpc must be \"2.0\""),
        );
    }

    handle_request(engine, request).await
}

/// Handle a parsed request.
pub async fn handle_request(
    engine: &Arc<ContextEngine>,
    request: JsonRpcRequest,
) -> JsonRpcResponse {
    let id = request.id.clone();
    match request.method.as_str() {
        "tools/list" => JsonRpcResponse::success(
            id,
            serde_json::json!({ "tools": tool_descriptors() }),
        ),
        "tools/call" => {
            let name = match request.params.get("name").and_then(|v| v.as_str()) {
                Some(n) => n.to_string(),
                None => {
                    return JsonRpcResponse::failure(
                        id,
                        JsonRpcError::invalid_params("tools/call requires a name"),
                    );
                }
            };
            let arguments = request
                .params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()));

            engine.limiter().acquire().await;

            // The spawned task is the panic boundary: a panicked handler
            // joins as an error instead of unwinding through the loop.
            let engine = engine.clone();
            let joined = tokio::spawn(async move {
                dispatch_tool(&engine, &name, arguments).await
            })
            .await;

            match joined {
                Ok(Ok(result)) => JsonRpcResponse::success(id, result),
                Ok(Err(error)) => JsonRpcResponse::failure(id, error),
                Err(join_err) => {
                    tracing::error!(error = %join_err, "tool handler panicked");
                    JsonRpcResponse::failure(
                        id,
                        JsonRpcError::internal("internal error: tool handler panicked"),
                    )
                }
            }
        }
        other => JsonRpcResponse::failure(id, JsonRpcError::method_not_found(other)),
    }
}

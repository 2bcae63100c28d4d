//! TCP dispatcher (spec §4.5, §6.3): the broker itself speaking the tool
//! protocol's line-delimited JSON-RPC framing, in the server role,
//! aggregating catalogs across every child.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::namespace::{qualify, unqualify};
use crate::registry::Registry;
use crate::transport::DEFAULT_CALL_DEADLINE;

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

/// Accept loop: one task per connection, each with its own request-ID
/// space (spec §6.3 "Multiple concurrent clients are permitted").
pub async fn serve(listener: TcpListener, registry: Arc<Registry>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, addr)) => {
                        tracing::debug!(peer = %addr, "tcp client connected");
                        let registry = registry.clone();
                        let conn_cancel = cancel.child_token();
                        tokio::spawn(handle_connection(socket, registry, conn_cancel));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "tcp accept failed");
                    }
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("tcp dispatcher shutting down");
                return;
            }
        }
    }
}

async fn handle_connection(socket: TcpStream, registry: Arc<Registry>, cancel: CancellationToken) {
    let (read_half, write_half) = socket.into_split();
    let writer = Arc::new(Mutex::new(write_half));
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let registry = registry.clone();
                        let writer = writer.clone();
                        tokio::spawn(async move {
                            let response = handle_frame(&line, &registry).await;
                            let mut out = serde_json::to_string(&response).unwrap_or_default();
                            out.push('\n');
                            let mut w = writer.lock().await;
                            let _ = w.write_all(out.as_bytes()).await;
                        });
                    }
                    Ok(None) | Err(_) => return,
                }
            }
            _ = cancel.cancelled() => return,
        }
    }
}

async fn handle_frame(line: &str, registry: &Registry) -> Value {
    let request: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return error_response(Value::Null, PARSE_ERROR, "parse error"),
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = match request.get("method").and_then(Value::as_str) {
        Some(m) => m,
        None => return error_response(id, INVALID_PARAMS, "missing method"),
    };
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    match method {
        "initialize" => success_response(
            id,
            serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": {}, "resources": {}, "prompts": {} },
                "serverInfo": { "name": "toolbroker", "version": env!("CARGO_PKG_VERSION") },
            }),
        ),
        "tools/list" => {
            let tools: Vec<Value> = registry
                .list_all_tools()
                .await
                .into_iter()
                .map(|(server, tool)| {
                    serde_json::json!({
                        "name": qualify(&server, &tool.name),
                        "description": tool.description,
                        "inputSchema": tool.input_schema,
                        "usageExamples": tool.usage_examples,
                    })
                })
                .collect();
            success_response(id, serde_json::json!({ "tools": tools }))
        }
        "tools/call" => handle_tools_call(id, params, registry).await,
        _ => error_response(id, METHOD_NOT_FOUND, &format!("unknown method '{method}'")),
    }
}

async fn handle_tools_call(id: Value, params: Value, registry: &Registry) -> Value {
    let Some(qualified_name) = params.get("name").and_then(Value::as_str) else {
        return error_response(id, INVALID_PARAMS, "missing 'name' in tools/call params");
    };

    // Accept either a "server/tool" qualified name, or an explicit "server"
    // field alongside a bare tool name (spec §4.5 "Behaviors").
    let (server, tool) = if let Some(server) = params.get("server").and_then(Value::as_str) {
        (server.to_string(), qualified_name.to_string())
    } else {
        match unqualify(qualified_name) {
            Some((server, tool)) => (server.to_string(), tool.to_string()),
            None => {
                return error_response(
                    id,
                    INVALID_PARAMS,
                    "'name' must be 'server/tool' or paired with an explicit 'server' field",
                )
            }
        }
    };

    let arguments = params.get("arguments").cloned().unwrap_or(Value::Object(Default::default()));

    match registry.call_tool(&server, &tool, arguments, DEFAULT_CALL_DEADLINE).await {
        Ok(result) => success_response(id, serde_json::to_value(result).unwrap_or(Value::Null)),
        Err(e) => error_response(id, e.jsonrpc_code(), &e.to_string()),
    }
}

fn success_response(id: Value, result: Value) -> Value {
    serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    serde_json::json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

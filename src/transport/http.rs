//! HTTP dispatcher (spec §4.4, §6.2): the REST surface over the registry.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;

use crate::error::BrokerError;
use crate::registry::Registry;
use crate::transport::{
    coerce_arguments, format_prompts_markdown, format_resources_markdown, format_status_markdown,
    format_tools_markdown, format_tools_quiet, format_tools_simple, invoke_resource, invoke_tool, render_prompt,
    DEFAULT_CALL_DEADLINE,
};

type AppState = Arc<Registry>;

/// Build the HTTP router over a registry (spec §6.2 endpoint table).
pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/tools", get(tools_markdown_handler))
        .route("/tools/json", get(tools_json_handler))
        .route("/tools/simple", get(tools_simple_handler))
        .route("/tools/quiet", get(tools_quiet_handler))
        .route("/call/:server/:tool", get(invoke_handler).post(invoke_handler))
        .route("/tools/:server/:tool", get(invoke_handler).post(invoke_handler))
        .route("/resources", get(resources_handler))
        .route("/resources/:server/*uri", get(read_resource_handler))
        .route("/prompts", get(prompts_handler))
        .route(
            "/prompts/:server/:name",
            get(render_prompt_handler).post(render_prompt_handler),
        )
        .with_state(registry)
}

fn broker_error_response(err: BrokerError) -> Response {
    (StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR), err.to_string())
        .into_response()
}

async fn status_handler(State(registry): State<AppState>) -> Response {
    let names = registry.names_in_order().await;
    let health = registry.all_health().await;
    let mut rows = Vec::with_capacity(names.len());
    for name in names {
        let state = registry
            .get(&name)
            .await
            .map(|h| format!("{:?}", h.state()))
            .unwrap_or_else(|| "Terminated".to_string());
        let health_state = health.get(&name).copied().unwrap_or(crate::health::HealthState::Starting);
        rows.push((name, state, health_state));
    }
    format_status_markdown(&rows).into_response()
}

async fn tools_markdown_handler(State(registry): State<AppState>) -> Response {
    format_tools_markdown(&registry.list_all_tools().await).into_response()
}

async fn tools_json_handler(State(registry): State<AppState>) -> Response {
    Json(registry.list_all_tools().await).into_response()
}

async fn tools_simple_handler(State(registry): State<AppState>) -> Response {
    format_tools_simple(&registry.list_all_tools().await).into_response()
}

async fn tools_quiet_handler(State(registry): State<AppState>) -> Response {
    format_tools_quiet(&registry.list_all_tools().await).into_response()
}

async fn resources_handler(State(registry): State<AppState>) -> Response {
    format_resources_markdown(&registry.list_all_resources().await).into_response()
}

async fn prompts_handler(State(registry): State<AppState>) -> Response {
    format_prompts_markdown(&registry.list_all_prompts().await).into_response()
}

/// `GET/POST /call/{server}/{tool}` and its `/tools/{server}/{tool}` alias
/// (spec §4.4 "Routing"). Arguments come from the query string on `GET`, or
/// from the request body on `POST` — a JSON body preserves structured
/// values verbatim, anything else is parsed as form-urlencoded with the
/// same coercion rules as `GET` (spec §6.2 "Parameter coercion").
async fn invoke_handler(
    State(registry): State<AppState>,
    Path((server, tool)): Path<(String, String)>,
    method: Method,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let arguments = match resolve_arguments(method, query, &headers, &body) {
        Ok(v) => v,
        Err(e) => return broker_error_response(e),
    };
    match invoke_tool(&registry, &server, &tool, arguments, DEFAULT_CALL_DEADLINE).await {
        Ok(text) => text.into_response(),
        Err(e) => broker_error_response(e),
    }
}

async fn read_resource_handler(
    State(registry): State<AppState>,
    Path((server, uri)): Path<(String, String)>,
) -> Response {
    match invoke_resource(&registry, &server, &uri, DEFAULT_CALL_DEADLINE).await {
        Ok(text) => text.into_response(),
        Err(e) => broker_error_response(e),
    }
}

async fn render_prompt_handler(
    State(registry): State<AppState>,
    Path((server, name)): Path<(String, String)>,
    method: Method,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let arguments = match resolve_arguments(method, query, &headers, &body) {
        Ok(Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| (k, value_to_string(&v)))
            .collect::<HashMap<_, _>>(),
        Ok(_) | Err(_) => HashMap::new(),
    };
    match render_prompt(&registry, &server, &name, &arguments, DEFAULT_CALL_DEADLINE).await {
        Ok(text) => text.into_response(),
        Err(e) => broker_error_response(e),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn resolve_arguments(
    method: Method,
    query: HashMap<String, String>,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Value, BrokerError> {
    if method == Method::GET {
        return Ok(coerce_arguments(&query));
    }

    let is_json = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);

    if is_json {
        if body.is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        return serde_json::from_slice(body)
            .map_err(|e| BrokerError::InvalidArguments(format!("invalid JSON body: {e}")));
    }

    let text = std::str::from_utf8(body)
        .map_err(|e| BrokerError::InvalidArguments(format!("invalid UTF-8 body: {e}")))?;
    Ok(coerce_arguments(&parse_form_urlencoded(text)))
}

/// Minimal `application/x-www-form-urlencoded` parser: `+` decodes to a
/// space, `%XX` decodes to its byte, pairs are joined on `&`.
fn parse_form_urlencoded(body: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if body.is_empty() {
        return out;
    }
    for pair in body.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (k, v) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        out.insert(percent_decode(k), percent_decode(v));
    }
    out
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

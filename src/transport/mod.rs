//! Shared resolve-and-forward pipeline for the HTTP, TCP, and SSE
//! dispatchers (spec §9 design notes: "Transport dispatchers share a common
//! resolve-and-forward core"). Each transport parses its own request shape,
//! then funnels through [`invoke_tool`] / [`render_prompt`] and one of the
//! formatting helpers below.

pub mod http;
pub mod sse;
pub mod tcp;

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use crate::error::Result;
use crate::health::HealthState;
use crate::protocol::{PromptDescriptor, ResourceDescriptor, ToolDescriptor};
use crate::registry::Registry;

/// Default per-call deadline when a transport doesn't specify one (spec
/// doesn't mandate a default; 30s matches the teacher's handshake default
/// and is a reasonable call timeout too).
pub const DEFAULT_CALL_DEADLINE: Duration = Duration::from_secs(30);

/// GET-query / form-urlencoded parameter coercion (spec §6.2, §8 boundary
/// behaviors): integer, then float, then boolean, else string. A leading
/// zero on a plain integer form (`"01"`) disqualifies it from numeric
/// coercion; decimal forms (`"0.5"`) are unaffected since they aren't a
/// plain integer form.
pub fn coerce_param(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }

    let digits_only = raw.strip_prefix('-').unwrap_or(raw);
    let is_plain_integer_form = !digits_only.is_empty() && digits_only.chars().all(|c| c.is_ascii_digit());
    if is_plain_integer_form {
        let has_invalid_leading_zero = digits_only.len() > 1 && digits_only.starts_with('0');
        if !has_invalid_leading_zero {
            if let Ok(n) = raw.parse::<i64>() {
                return Value::Number(n.into());
            }
        }
    } else {
        let looks_numeric = !raw.is_empty()
            && raw.chars().any(|c| c.is_ascii_digit())
            && raw
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
        if looks_numeric {
            if let Ok(f) = raw.parse::<f64>() {
                if let Some(n) = serde_json::Number::from_f64(f) {
                    return Value::Number(n);
                }
            }
        }
    }

    Value::String(raw.to_string())
}

/// Coerce a flat `key -> raw string` map (GET query or form body) into a
/// JSON arguments object.
pub fn coerce_arguments(raw: &HashMap<String, String>) -> Value {
    let map: serde_json::Map<String, Value> = raw
        .iter()
        .map(|(k, v)| (k.clone(), coerce_param(v)))
        .collect();
    Value::Object(map)
}

/// Call a tool through the registry and format the child's reply as the
/// flat text a client receives (spec §4.4 response body): concatenated
/// `content[].text` plus an optional pagination trailer.
pub async fn invoke_tool(
    registry: &Registry,
    server: &str,
    tool: &str,
    arguments: Value,
    deadline: Duration,
) -> Result<String> {
    let result = registry.call_tool(server, tool, arguments, deadline).await?;
    let mut text = result.text();
    if let Some(trailer) = result.pages_left_trailer() {
        text.push('\n');
        text.push_str(&trailer);
    }
    Ok(text)
}

pub async fn invoke_resource(registry: &Registry, server: &str, uri: &str, deadline: Duration) -> Result<String> {
    let result = registry.read_resource(server, uri, deadline).await?;
    let mut text = result.text();
    if let Some(trailer) = result.pages_left_trailer() {
        text.push('\n');
        text.push_str(&trailer);
    }
    Ok(text)
}

/// Render a prompt with caller-supplied arguments and return the
/// concatenation of every message's `text` field (mirroring the tool
/// response's flattened-text convention).
pub async fn render_prompt(
    registry: &Registry,
    server: &str,
    name: &str,
    arguments: &HashMap<String, String>,
    deadline: Duration,
) -> Result<String> {
    let rendered = registry.get_prompt(server, name, arguments, deadline).await?;
    Ok(flatten_text(&rendered))
}

fn flatten_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(flatten_text).collect::<Vec<_>>().join(""),
        Value::Object(map) => {
            if let Some(Value::String(s)) = map.get("text") {
                s.clone()
            } else {
                map.values().map(flatten_text).collect::<Vec<_>>().join("")
            }
        }
        _ => String::new(),
    }
}

/// Markdown catalog view for `GET /tools` (spec §6.2).
pub fn format_tools_markdown(tools: &[(String, ToolDescriptor)]) -> String {
    if tools.is_empty() {
        return "_No tools available._\n".to_string();
    }
    let mut out = String::new();
    for (server, tool) in tools {
        out.push_str(&format!("## {server}/{}\n\n{}\n\n", tool.name, tool.description));
    }
    out
}

/// Minimal name+description view for `GET /tools/simple`.
pub fn format_tools_simple(tools: &[(String, ToolDescriptor)]) -> String {
    if tools.is_empty() {
        return String::new();
    }
    tools
        .iter()
        .map(|(server, tool)| format!("{server}/{}: {}", tool.name, tool.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Names-only view for `GET /tools/quiet`.
pub fn format_tools_quiet(tools: &[(String, ToolDescriptor)]) -> String {
    tools
        .iter()
        .map(|(server, tool)| format!("{server}/{}", tool.name))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_resources_markdown(resources: &[(String, ResourceDescriptor)]) -> String {
    if resources.is_empty() {
        return "_No resources available._\n".to_string();
    }
    let mut out = String::new();
    for (server, r) in resources {
        out.push_str(&format!(
            "## {server}/{}\n\n{}\n\n",
            r.uri,
            r.description.as_deref().unwrap_or("")
        ));
    }
    out
}

pub fn format_prompts_markdown(prompts: &[(String, PromptDescriptor)]) -> String {
    if prompts.is_empty() {
        return "_No prompts available._\n".to_string();
    }
    let mut out = String::new();
    for (server, p) in prompts {
        out.push_str(&format!("## {server}/{}\n\n{}\n\n", p.name, p.description));
    }
    out
}

/// Status view for `GET /status`: per-child lifecycle + health state.
pub fn format_status_markdown(rows: &[(String, String, HealthState)]) -> String {
    if rows.is_empty() {
        return "_No children configured._\n".to_string();
    }
    let mut out = String::from("| Server | State | Health |\n|---|---|---|\n");
    for (name, state, health) in rows {
        out.push_str(&format!("| {name} | {state} | {:?} |\n", health));
    }
    out
}

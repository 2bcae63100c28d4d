//! Wire types for the tool protocol (spec §6.1): line-delimited JSON-RPC
//! frames exchanged with child processes over stdio, and the MCP-shaped
//! descriptors a child's catalog is made of.
//!
//! Dynamic payloads (`params`, `result`, schemas) are modeled as
//! `serde_json::Value` rather than a hand-rolled tagged enum — `Value`
//! already is the tagged variant design note 1 describes, and it's what
//! the teacher crate reaches for in the same spot (`schema_override:
//! Option<serde_json::Value>`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// An outbound request frame, `{"jsonrpc":"2.0","method":...,"params":...,"id":...}`.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
            id,
        }
    }
}

/// A one-way notification frame, identical to a request but with no `id`.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

/// The `error` object embedded in an error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An inbound frame from a child: either a response (success/error) paired
/// to one of our request IDs, or an unsolicited message (notification or
/// server-initiated request) that the broker logs and drops per spec §4.2.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InboundFrame {
    Response(RawResponse),
    Other(Value),
}

/// A raw child response, still carrying either `result` or `error`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawResponse {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
}

impl RawResponse {
    /// The response's integer `id`, if it is one — the broker only ever
    /// allocates integer IDs, so a non-integer `id` cannot match a pending
    /// call (spec §4.2).
    pub fn id_as_u64(&self) -> Option<u64> {
        self.id.as_u64()
    }
}

/// Outcome of a completed outbound call: the child's `result`, or its
/// `error` object forwarded verbatim (spec §7 `ChildError`).
pub type CallOutcome = std::result::Result<Value, JsonRpcErrorObject>;

/// Metadata for a callable tool (spec §3 `ToolDescriptor`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema", rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(default, rename = "usageExamples", skip_serializing_if = "Option::is_none")]
    pub usage_examples: Option<String>,
}

fn default_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// A URI-addressed read-only artifact (spec §3 `ResourceDescriptor`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A parameterized message template (spec §3 `PromptDescriptor`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub messages: Value,
}

/// Result shape of a `tools/call` (spec §6.1): text fragments plus optional
/// pagination hints.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentFragment>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default, rename = "totalPages")]
    pub total_pages: Option<u64>,
    #[serde(default, rename = "next_page_token")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentFragment {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

impl CallToolResult {
    /// The textual concatenation of `content[].text` (spec §4.4).
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("")
    }

    /// `Some("Pages left: N")` whenever `page`/`totalPages` are present (spec §8).
    pub fn pages_left_trailer(&self) -> Option<String> {
        let (page, total) = (self.page?, self.total_pages?);
        let left = total.saturating_sub(page);
        let mut trailer = format!("Pages left: {left}");
        if let Some(ref token) = self.next_page_token {
            trailer.push_str(&format!("\nnext_page_token: {token}"));
        }
        Some(trailer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_without_params_when_absent() {
        let req = JsonRpcRequest::new(1, "initialize", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("params"));
        assert!(json.contains("\"id\":1"));
    }

    #[test]
    fn test_pages_left_trailer() {
        let mut result = CallToolResult::default();
        result.page = Some(2);
        result.total_pages = Some(5);
        assert_eq!(result.pages_left_trailer(), Some("Pages left: 3".to_string()));
    }

    #[test]
    fn test_pages_left_trailer_absent_without_pagination() {
        let result = CallToolResult::default();
        assert_eq!(result.pages_left_trailer(), None);
    }

    #[test]
    fn test_content_text_concatenation() {
        let result = CallToolResult {
            content: vec![
                ContentFragment { kind: "text".into(), text: "hi ".into() },
                ContentFragment { kind: "text".into(), text: "there".into() },
            ],
            ..Default::default()
        };
        assert_eq!(result.text(), "hi there");
    }

    #[test]
    fn test_raw_response_id_as_u64() {
        let resp: RawResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":7,"result":{}}"#,
        )
        .unwrap();
        assert_eq!(resp.id_as_u64(), Some(7));
    }

    #[test]
    fn test_raw_response_string_id_has_no_u64() {
        let resp: RawResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":"abc","result":{}}"#,
        )
        .unwrap();
        assert_eq!(resp.id_as_u64(), None);
    }
}

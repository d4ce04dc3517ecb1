//! MCP JSON-RPC 2.0 message types.
//!
//! Messages are newline-delimited JSON objects. Requests carry a numeric id
//! assigned by the caller; notifications carry none.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::McpClientError;

/// Protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const METHOD_RESOURCES_LIST: &str = "resources/list";
pub const METHOD_RESOURCES_READ: &str = "resources/read";
pub const METHOD_PING: &str = "ping";
pub const NOTIFY_TOOLS_CHANGED: &str = "notifications/tools/list_changed";
pub const NOTIFY_RESOURCES_CHANGED: &str = "notifications/resources/list_changed";

/// JSON-RPC "method not found".
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC request structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Value>,
}

impl<'a> JsonRpcRequest<'a> {
    pub const fn new(id: u64, method: &'a str, params: Option<&'a Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// JSON-RPC notification structure (no id, no response).
#[derive(Debug, Serialize)]
pub struct JsonRpcNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Value>,
}

impl<'a> JsonRpcNotification<'a> {
    pub const fn new(method: &'a str, params: Option<&'a Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<JsonRpcError> for McpClientError {
    fn from(e: JsonRpcError) -> Self {
        Self::Server {
            code: e.code,
            message: e.message,
        }
    }
}

/// Any message a server may write.
#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// A decoded line from the server.
#[derive(Debug)]
pub enum Incoming {
    /// Reply to one of our requests.
    Response {
        id: u64,
        result: Result<Value, JsonRpcError>,
    },
    /// Server-initiated notification.
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// Server-initiated request; must be answered.
    Request { id: Value, method: String },
}

impl Incoming {
    pub fn parse(line: &str) -> Result<Self, McpClientError> {
        let raw: RawMessage = serde_json::from_str(line)?;
        match (raw.id, raw.method) {
            (Some(id), Some(method)) => Ok(Self::Request { id, method }),
            (None, Some(method)) => Ok(Self::Notification {
                method,
                params: raw.params,
            }),
            (Some(id), None) => {
                let id = id.as_u64().ok_or_else(|| {
                    McpClientError::Protocol(format!("response id {id} is not one of ours"))
                })?;
                let result = match raw.error {
                    Some(error) => Err(error),
                    None => Ok(raw.result.unwrap_or(Value::Null)),
                };
                Ok(Self::Response { id, result })
            }
            (None, None) => Err(McpClientError::Protocol(
                "message has neither id nor method".to_string(),
            )),
        }
    }
}

/// Reply to a server-initiated request. Only `ping` is supported.
pub fn reply_to_server_request(id: &Value, method: &str) -> Value {
    if method == METHOD_PING {
        json!({ "jsonrpc": "2.0", "id": id, "result": {} })
    } else {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": METHOD_NOT_FOUND, "message": format!("Method not found: {method}") }
        })
    }
}

/// Parameters for `initialize`.
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "clientInfo": {
            "name": "meshmate",
            "version": env!("CARGO_PKG_VERSION")
        },
        "capabilities": {}
    })
}

/// MCP server info returned during initialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// A listable capability (`tools`, `resources`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCapability {
    #[serde(default)]
    pub list_changed: Option<bool>,
}

/// MCP server capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<ListCapability>,
    #[serde(default)]
    pub resources: Option<ListCapability>,
}

/// MCP initialization result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(default)]
    pub server_info: ServerInfo,
}

/// MCP tool schema from `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolSchema {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<McpToolSchema>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// MCP resource entry from `resources/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpResourceSchema {
    pub uri: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResult {
    #[serde(default)]
    pub resources: Vec<McpResourceSchema>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// One entry of a `resources/read` result. Exactly one of `text` and `blob`
/// (base64) is expected.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub blob: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReadResourceResult {
    #[serde(default)]
    pub contents: Vec<ResourceContents>,
}

/// Result of `tools/call`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Flatten the content array into plain text, one item per line.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(content_item_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn content_item_text(item: &Value) -> String {
    let field = |name: &str| item.get(name).and_then(Value::as_str);
    match field("type") {
        Some("text") => field("text").unwrap_or_default().to_string(),
        Some("image" | "audio") => format!(
            "[{} content: {}]",
            field("type").unwrap_or_default(),
            field("mimeType").unwrap_or("unknown type")
        ),
        Some("resource") => {
            let resource = item.get("resource");
            resource
                .and_then(|r| r.get("text"))
                .and_then(Value::as_str)
                .map_or_else(
                    || {
                        let uri = resource
                            .and_then(|r| r.get("uri"))
                            .and_then(Value::as_str)
                            .unwrap_or("unknown");
                        format!("[resource: {uri}]")
                    },
                    str::to_string,
                )
        }
        _ => item.to_string(),
    }
}

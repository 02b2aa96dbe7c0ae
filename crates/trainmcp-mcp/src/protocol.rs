//! MCP protocol types.
//!
//! JSON-RPC 2.0 envelopes plus the few MCP payloads this client speaks:
//! `initialize`, `tools/list`, `tools/call` and `ping`. Reply types are
//! deliberately lenient: servers in the wild omit fields freely.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const METHOD_PING: &str = "ping";

/// Request ID as it appears on the wire.
///
/// Requests always use numbers, but replies are matched leniently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl RequestId {
    /// Whether this id refers to the numeric request `id`.
    pub fn matches(&self, id: u64) -> bool {
        match self {
            Self::Number(n) => *n == id,
            Self::String(s) => s.parse::<u64>().map(|n| n == id).unwrap_or(false),
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// JSON-RPC request message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest<P> {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: P,
}

impl<P> JsonRpcRequest<P> {
    pub fn new(id: u64, method: impl Into<String>, params: P) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC reply. Any object decodes; validation happens in the correlator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Client information sent during initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "trainmcp".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    /// Always an empty object; this client advertises no capabilities.
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: Value::Object(Default::default()),
            client_info: ClientInfo::default(),
        }
    }
}

/// Server information returned during initialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Result of the initialize request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializeResult {
    pub protocol_version: Option<String>,
    pub capabilities: Value,
    pub server_info: Option<ServerInfo>,
}

/// One entry of a `tools/list` reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct McpToolDescriptor {
    pub name: Option<String>,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
}

/// Result of the tools/list request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListToolsResult {
    pub tools: Vec<McpToolDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for the tools/call request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    pub arguments: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = JsonRpcRequest::new(1, METHOD_INITIALIZE, InitializeParams::default());
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 1);
        assert_eq!(value["method"], "initialize");
        assert_eq!(value["params"]["protocolVersion"], "2024-11-05");
        assert_eq!(value["params"]["capabilities"], json!({}));
        assert_eq!(value["params"]["clientInfo"]["name"], "trainmcp");
    }

    #[test]
    fn test_ping_has_empty_params() {
        let request = JsonRpcRequest::new(7, METHOD_PING, json!({}));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["params"], json!({}));
    }

    #[test]
    fn test_response_with_error() {
        let response: JsonRpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "error": {"code": -32602, "message": "Invalid params"}
        }))
        .unwrap();

        assert!(response.is_error());
        assert!(response.id.unwrap().matches(3));
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[test]
    fn test_request_id_matching() {
        assert!(RequestId::Number(5).matches(5));
        assert!(RequestId::String("5".into()).matches(5));
        assert!(!RequestId::String("abc".into()).matches(5));
        assert!(!RequestId::Number(4).matches(5));
    }

    #[test]
    fn test_lenient_initialize_result() {
        let result: InitializeResult = serde_json::from_value(json!({
            "serverInfo": {"name": "12306-mcp"}
        }))
        .unwrap();
        assert_eq!(result.server_info.unwrap().name, "12306-mcp");
        assert!(result.protocol_version.is_none());
    }

    #[test]
    fn test_lenient_tool_descriptor() {
        let list: ListToolsResult = serde_json::from_value(json!({
            "tools": [
                {"name": "get-tickets", "description": "Query tickets", "inputSchema": {"type": "object"}},
                {"description": "nameless"}
            ]
        }))
        .unwrap();

        assert_eq!(list.tools.len(), 2);
        assert_eq!(list.tools[0].name.as_deref(), Some("get-tickets"));
        assert!(list.tools[1].name.is_none());
        assert!(list.tools[1].input_schema.is_none());
    }
}

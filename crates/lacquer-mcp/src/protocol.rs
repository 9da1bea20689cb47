//! JSON-RPC 2.0 envelope types for the Model Context Protocol, plus the
//! handful of MCP-specific method payloads this engine needs
//! (`initialize`, `notifications/initialized`, `tools/list`,
//! `tools/call`).
//!
//! Unlike the teacher's `protocol.rs` (whose `MCPRequest`/`MCPResponse`
//! carry a bare string `id` and no `jsonrpc` field), these types are a
//! real JSON-RPC 2.0 envelope: `jsonrpc: "2.0"`, an integer id assigned
//! by the client, and `method`/`params` at the top level. The MCP wire
//! protocol is JSON-RPC 2.0 (spec.md §6), so the envelope follows that
//! exactly rather than the teacher's simplified shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub const JSONRPC_VERSION: &str = "2.0";
pub const MCP_PROTOCOL_VERSION: &str = "0.1.0";

/// JSON-RPC error code for "unknown method", per the JSON-RPC 2.0 spec
/// and reiterated in spec.md §6.
pub const ERROR_METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// A JSON-RPC notification: no `id`, so no response is expected.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: ClientInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    #[serde(default)]
    pub tools: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
    #[serde(other)]
    Other,
}

pub fn initialize_request(id: i64, client_name: &str, client_version: &str) -> RpcRequest {
    let params = InitializeParams {
        protocol_version: MCP_PROTOCOL_VERSION.to_string(),
        capabilities: ClientCapabilities::default(),
        client_info: ClientInfo {
            name: client_name.to_string(),
            version: client_version.to_string(),
        },
    };
    RpcRequest::new(id, "initialize", Some(serde_json::to_value(params).unwrap()))
}

pub fn initialized_notification() -> RpcRequest {
    RpcRequest::notification("notifications/initialized", None)
}

pub fn list_tools_request(id: i64) -> RpcRequest {
    RpcRequest::new(id, "tools/list", None)
}

pub fn call_tool_request(id: i64, name: &str, arguments: Value) -> RpcRequest {
    let params = ToolCallParams {
        name: name.to_string(),
        arguments,
    };
    RpcRequest::new(id, "tools/call", Some(serde_json::to_value(params).unwrap()))
}

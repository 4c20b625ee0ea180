/// MCP protocol types
///
/// Based on Model Context Protocol specification (JSON-RPC 2.0)
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::client::McpTransport;
use crate::RelayError;

/// Default MCP protocol version (as of November 2024)
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Supported MCP protocol versions
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26"];

impl McpServerConfig {
    /// Stdio server launched from a `.js` or `.py` script
    pub fn from_script(script: impl AsRef<Path>) -> Result<Self, McpError> {
        let script = script.as_ref();
        let command = match script.extension().and_then(|e| e.to_str()) {
            Some("js") => "node".to_string(),
            Some("py") if cfg!(windows) => "python".to_string(),
            Some("py") => "python3".to_string(),
            _ => {
                return Err(McpError::InvalidParams(format!(
                    "Server script must be a .js or .py file: {}",
                    script.display()
                )))
            }
        };
        let name = script
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("mcp")
            .to_string();

        Ok(Self {
            name,
            command,
            args: vec![script.to_string_lossy().into_owned()],
            env: None,
            cwd: None,
            url: None,
            protocol_version: None,
        })
    }

    /// Server reached over the SSE transport (e.g. `http://localhost:3001/sse`)
    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: String::new(),
            args: Vec::new(),
            env: None,
            cwd: None,
            url: Some(url.into()),
            protocol_version: None,
        }
    }

    /// SSE when a URL is configured, stdio otherwise
    pub fn transport(&self) -> McpTransport {
        if self.url.is_some() {
            McpTransport::Sse
        } else {
            McpTransport::Stdio
        }
    }

    /// Get the protocol version to use (configured or default)
    pub fn protocol_version(&self) -> &str {
        self.protocol_version
            .as_deref()
            .unwrap_or(DEFAULT_PROTOCOL_VERSION)
    }

    /// Validate the protocol version is supported
    pub fn validate_protocol_version(&self) -> Result<(), String> {
        let version = self.protocol_version();
        if SUPPORTED_PROTOCOL_VERSIONS.contains(&version) {
            Ok(())
        } else {
            Err(format!(
                "Unsupported protocol version: {}. Supported versions: {:?}",
                version, SUPPORTED_PROTOCOL_VERSIONS
            ))
        }
    }
}

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,       // always "2.0"
    pub id: serde_json::Value, // string or number
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 Notification (no id, no response)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 Response
///
/// Server-initiated notifications deserialize with a null `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// MCP initialization request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

/// Client capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, serde_json::Value>>,
}

/// Client information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// MCP initialization result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// Server capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Server information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// MCP Tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value, // JSON Schema
}

/// tools/list request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// tools/list result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<McpTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// tools/call request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

/// tools/call result as sent by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolCall {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// Tool content (text, image or embedded resource)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(rename = "resource")]
    Resource { resource: ResourceContents },
}

/// Resource contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceContents {
    pub uri: String,
    #[serde(rename = "mimeType")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>, // base64
}

/// Tool call result with content flattened to text parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpToolResult {
    /// One entry per content item, in server order
    pub texts: Vec<String>,
    pub is_error: bool,
}

impl McpToolResult {
    /// `content[0].text`, which tools use for their JSON payload
    pub fn primary_text(&self) -> Option<&str> {
        self.texts.first().map(|s| s.as_str())
    }

    pub fn joined(&self) -> String {
        self.texts.join("\n")
    }
}

impl From<McpToolCall> for McpToolResult {
    fn from(call: McpToolCall) -> Self {
        let texts = call
            .content
            .into_iter()
            .map(|item| match item {
                ToolContent::Text { text } => text,
                ToolContent::Image { .. } => "[image content]".to_string(),
                ToolContent::Resource { resource } => resource
                    .text
                    .unwrap_or_else(|| format!("[resource: {}]", resource.uri)),
            })
            .collect();
        Self {
            texts,
            is_error: call.is_error.unwrap_or(false),
        }
    }
}

/// MCP error types
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Tool execution error: {0}")]
    ToolError(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Convert to error code string
    pub fn code(&self) -> &'static str {
        match self {
            McpError::Transport(_) => "TRANSPORT_ERROR",
            McpError::Protocol(_) => "PROTOCOL_ERROR",
            McpError::ToolNotFound(_) => "TOOL_NOT_FOUND",
            McpError::InvalidParams(_) => "INVALID_PARAMS",
            McpError::ToolError(_) => "TOOL_ERROR",
            McpError::Timeout(_) => "TIMEOUT",
            McpError::ServerError(_) => "SERVER_ERROR",
            McpError::Io(_) => "IO_ERROR",
            McpError::Json(_) => "JSON_ERROR",
        }
    }
}

impl From<McpError> for RelayError {
    fn from(e: McpError) -> Self {
        match e {
            McpError::Transport(_) | McpError::Io(_) => RelayError::Connection(e.to_string()),
            McpError::Protocol(_) | McpError::Json(_) => RelayError::Protocol(e.to_string()),
            McpError::Timeout(after) => RelayError::Timeout(after),
            McpError::InvalidParams(_) => RelayError::Config(e.to_string()),
            McpError::ToolNotFound(_) | McpError::ToolError(_) | McpError::ServerError(_) => {
                RelayError::ToolExecution(e.to_string())
            }
        }
    }
}

/// MCP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Server name/identifier
    pub name: String,
    /// Command to execute (e.g., "node", "python3"); unused for SSE
    #[serde(default)]
    pub command: String,
    /// Arguments to pass to command
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    /// Working directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// SSE endpoint; selects the SSE transport when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// MCP protocol version to use (defaults to latest supported)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
}

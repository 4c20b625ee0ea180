/// Model Context Protocol (MCP) integration
///
/// This module connects to the external tool provider, discovers its tools,
/// and invokes them on behalf of orchestration sessions.
///
/// MCP Protocol Spec: https://spec.modelcontextprotocol.io/specification/
///
/// Architecture:
/// - `client`: Low-level MCP client (stdio/SSE transport)
/// - `provider`: The `ToolProvider` seam used by sessions
/// - `catalog`: Shared, atomically refreshed tool list
/// - `types`: MCP protocol types (JSON-RPC 2.0 based)
pub mod catalog;
pub mod client;
pub mod provider;
pub mod types;

pub use catalog::{ToolCatalog, ToolDescriptor};
pub use client::{McpClient, McpTransport, REQUEST_TIMEOUT};
pub use provider::ToolProvider;
pub use types::{
    McpError, McpServerConfig, McpTool, McpToolCall, McpToolResult, DEFAULT_PROTOCOL_VERSION,
    SUPPORTED_PROTOCOL_VERSIONS,
};

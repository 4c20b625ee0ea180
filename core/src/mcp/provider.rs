use async_trait::async_trait;
use serde_json::Value;

use super::types::{McpError, McpTool, McpToolResult};

/// The external tool provider as seen by the orchestrator.
///
/// Implemented by [`super::McpClient`]; tests supply in-memory providers.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Every tool the provider exposes
    async fn list_tools(&self) -> Result<Vec<McpTool>, McpError>;

    /// Invoke one tool. Tool-level failures come back as `is_error = true`,
    /// not as `Err`.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<McpToolResult, McpError>;
}

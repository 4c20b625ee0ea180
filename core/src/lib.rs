// Relay Core Library
// Streaming tool orchestration: model decides, MCP tools run, model narrates.

pub mod http;
pub mod ingress;
pub mod llm;
pub mod mcp;
pub mod orchestrator;
pub mod stream;

// Export core types
pub use http::{SendOptions, SendOutcome, StreamEvent, StreamingClient};
pub use ingress::{run_prompt, IngressConfig, IngressServer};
pub use llm::{ModelClient, ModelClientConfig, ModelDecision, ToolInvocation};
pub use mcp::{McpClient, McpServerConfig, ToolCatalog, ToolDescriptor, ToolProvider};
pub use orchestrator::{
    OrchestrationRequest, OrchestrationSession, Orchestrator, OrchestratorOptions, OutputSink,
    SessionReport, SessionState, SinkEvent, ToolInvocationResult,
};
pub use stream::{Frame, FrameError, StreamFrameDecoder};

// Error types
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelayError {
    /// Stable error code surfaced in error-shaped terminal events
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Connection(_) => "CONNECTION_ERROR",
            RelayError::Protocol(_) => "PROTOCOL_ERROR",
            RelayError::Decode(_) => "DECODE_ERROR",
            RelayError::ToolExecution(_) => "TOOL_EXECUTION_ERROR",
            RelayError::Timeout(_) => "TIMEOUT",
            RelayError::Cancelled => "CANCELLED",
            RelayError::Config(_) => "CONFIG_ERROR",
            RelayError::Io(_) => "IO_ERROR",
            RelayError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

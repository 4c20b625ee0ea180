mod config;
use config::{Mode, RelayAgentConfig};
use relay_core::mcp::{McpClient, ToolCatalog, ToolProvider};
use relay_core::{run_prompt, IngressServer, ModelClient, Orchestrator};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logging / tracing
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,relay_core=info,relay_agent=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    // Load configuration (defaults + env + optional TOML overlay)
    let cfg = RelayAgentConfig::load();
    info!(
        target: "relay_agent",
        mode = ?cfg.mode,
        model = %cfg.model.model,
        endpoint = %cfg.model.endpoint_url,
        "Starting Relay agent"
    );

    // Tool provider + catalog, refreshed once at startup
    let catalog = Arc::new(ToolCatalog::new());
    let client = match cfg.mcp.clone() {
        Some(mcp_cfg) => {
            let client = Arc::new(McpClient::new(mcp_cfg));
            client.connect().await?;
            let tools = catalog.refresh(client.as_ref()).await?;
            info!(
                target: "relay_agent",
                tools = ?tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
                "Connected to tool provider"
            );
            Some(client)
        }
        None => {
            warn!(target: "relay_agent", "No tool provider configured (set RELAY_MCP_URL or RELAY_MCP_SCRIPT); running without tools");
            None
        }
    };

    let provider: Arc<dyn ToolProvider> = match &client {
        Some(c) => c.clone(),
        None => Arc::new(NoTools),
    };
    let model = ModelClient::new(cfg.model.clone())?;
    let orchestrator = Arc::new(Orchestrator::new(
        model,
        provider,
        Arc::clone(&catalog),
        cfg.orchestrator.clone(),
    ));

    let outcome = match cfg.mode {
        Mode::Serve => {
            let shutdown = CancellationToken::new();
            let server = IngressServer::new(cfg.ingress.clone(), Arc::clone(&orchestrator));
            let serving = tokio::spawn(server.serve(shutdown.clone()));

            // Ctrl+C handler to shutdown gracefully
            if let Err(e) = signal::ctrl_c().await {
                error!(target: "relay_agent", error = %e, "Failed to listen for Ctrl+C");
            }
            info!(target: "relay_agent", "Shutting down...");
            shutdown.cancel();
            match serving.await {
                Ok(res) => res,
                Err(e) => {
                    error!(target: "relay_agent", error = %e, "Ingress task panicked");
                    Ok(())
                }
            }
        }
        Mode::Prompt => {
            let stdin = BufReader::new(tokio::io::stdin());
            run_prompt(&orchestrator, stdin, tokio::io::stdout()).await
        }
    };

    if let Some(client) = client {
        client.disconnect().await.ok();
    }
    outcome?;
    Ok(())
}

/// Stand-in provider when no MCP server is configured
struct NoTools;

#[async_trait::async_trait]
impl ToolProvider for NoTools {
    fn name(&self) -> &str {
        "none"
    }

    async fn list_tools(&self) -> Result<Vec<relay_core::mcp::McpTool>, relay_core::mcp::McpError> {
        Ok(Vec::new())
    }

    async fn call_tool(
        &self,
        name: &str,
        _arguments: Option<serde_json::Value>,
    ) -> Result<relay_core::mcp::McpToolResult, relay_core::mcp::McpError> {
        Err(relay_core::mcp::McpError::ToolNotFound(name.to_string()))
    }
}

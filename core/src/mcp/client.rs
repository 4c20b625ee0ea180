/// MCP Client implementation
///
/// Provides communication with one MCP server over stdio or SSE.
/// Supports JSON-RPC 2.0 protocol with request/response correlation by id.
use super::provider::ToolProvider;
use super::types::*;
use crate::stream::StreamFrameDecoder;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// How long a request waits for its response
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// MCP transport type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpTransport {
    /// Standard input/output of a child process
    Stdio,
    /// Server-Sent Events (HTTP-based)
    Sse,
}

/// Where outgoing messages are written
enum Outbound {
    Stdio(ChildStdin),
    Sse {
        http: reqwest::Client,
        endpoint: reqwest::Url,
    },
}

/// MCP client for communicating with a single MCP server
pub struct McpClient {
    /// Server configuration
    config: McpServerConfig,
    /// Child process handle (stdio only)
    process: Mutex<Option<Child>>,
    /// Message writer
    outbound: Mutex<Option<Outbound>>,
    /// Reader tasks
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Request ID counter
    request_id: AtomicU64,
    /// Pending requests: request_id -> response channel
    pending: PendingMap,
    /// Server info after initialization
    server_info: Mutex<Option<ServerInfo>>,
    /// Server capabilities
    capabilities: Mutex<Option<ServerCapabilities>>,
    /// Serializes tools/call on this connection
    call_gate: Mutex<()>,
    request_timeout: Duration,
}

impl McpClient {
    /// Create a new MCP client with configuration
    pub fn new(config: McpServerConfig) -> Self {
        Self {
            config,
            process: Mutex::new(None),
            outbound: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            request_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            server_info: Mutex::new(None),
            capabilities: Mutex::new(None),
            call_gate: Mutex::new(()),
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    /// Open the transport and run the initialize handshake
    pub async fn connect(&self) -> Result<(), McpError> {
        self.config
            .validate_protocol_version()
            .map_err(McpError::Protocol)?;

        info!(
            target: "mcp_client",
            server = %self.config.name,
            transport = ?self.config.transport(),
            "Connecting to MCP server"
        );

        match self.config.transport() {
            McpTransport::Stdio => self.connect_stdio().await?,
            McpTransport::Sse => self.connect_sse().await?,
        }

        let init_result = match self.initialize().await {
            Ok(r) => r,
            Err(e) => {
                error!(target: "mcp_client", server = %self.config.name, error = %e, "Initialize failed");
                let _ = self.disconnect().await;
                return Err(e);
            }
        };
        self.send_notification("notifications/initialized", None)
            .await?;

        *self.server_info.lock().await = Some(init_result.server_info.clone());
        *self.capabilities.lock().await = Some(init_result.capabilities.clone());

        info!(
            target: "mcp_client",
            server = %self.config.name,
            server_name = %init_result.server_info.name,
            server_version = %init_result.server_info.version,
            protocol_version = %init_result.protocol_version,
            "MCP server connected and initialized"
        );

        Ok(())
    }

    async fn connect_stdio(&self) -> Result<(), McpError> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref env) = self.config.env {
            for (key, val) in env {
                cmd.env(key, val);
            }
        }

        if let Some(ref cwd) = self.config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            error!(target: "mcp_client", error = %e, "Failed to spawn MCP server process");
            McpError::Transport(format!("Failed to spawn process: {}", e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("Failed to capture stdin".to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("Failed to capture stdout".to_string()))?;

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.spawn_stdout_reader(stdout));
        if let Some(stderr) = child.stderr.take() {
            let server_name = self.config.name.clone();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "mcp_client", server = %server_name, "stderr: {}", line);
                }
            }));
        }
        drop(tasks);

        *self.outbound.lock().await = Some(Outbound::Stdio(stdin));
        *self.process.lock().await = Some(child);
        Ok(())
    }

    async fn connect_sse(&self) -> Result<(), McpError> {
        let url = self
            .config
            .url
            .as_deref()
            .ok_or_else(|| McpError::InvalidParams("SSE transport requires a url".to_string()))?;
        let base = reqwest::Url::parse(url)
            .map_err(|e| McpError::InvalidParams(format!("Invalid SSE url {}: {}", url, e)))?;

        let http = reqwest::Client::new();
        let resp = http
            .get(base.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("Failed to open SSE stream: {}", e)))?;
        if !resp.status().is_success() {
            return Err(McpError::Transport(format!(
                "SSE stream returned status {}",
                resp.status()
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = self.spawn_sse_reader(resp, base, endpoint_tx);
        self.tasks.lock().await.push(reader);

        let endpoint = timeout(self.request_timeout, endpoint_rx)
            .await
            .map_err(|_| McpError::Timeout(self.request_timeout))?
            .map_err(|_| {
                McpError::Transport("SSE stream closed before announcing an endpoint".to_string())
            })?;

        debug!(target: "mcp_client", server = %self.config.name, endpoint = %endpoint, "SSE message endpoint announced");
        *self.outbound.lock().await = Some(Outbound::Sse { http, endpoint });
        Ok(())
    }

    /// Disconnect from the MCP server
    pub async fn disconnect(&self) -> Result<(), McpError> {
        info!(target: "mcp_client", server = %self.config.name, "Disconnecting from MCP server");

        // Close stdin to signal shutdown
        if let Some(Outbound::Stdio(mut stdin)) = self.outbound.lock().await.take() {
            let _ = stdin.shutdown().await;
        }

        if let Some(mut child) = self.process.lock().await.take() {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }

        for handle in self.tasks.lock().await.drain(..) {
            handle.abort();
        }
        fail_pending(&self.pending).await;

        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.outbound.lock().await.is_some()
    }

    /// Send initialize request
    async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let params = InitializeParams {
            protocol_version: self.config.protocol_version().to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "relay".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let result = self.send_request("initialize", Some(json!(params))).await?;

        serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Invalid initialize result: {}", e)))
    }

    /// List available tools, following `nextCursor` pagination
    pub async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        debug!(target: "mcp_client", server = %self.config.name, "Listing tools");

        let mut all_tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = ListToolsParams { cursor };
            let result = self.send_request("tools/list", Some(json!(params))).await?;

            let list_result: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| McpError::Protocol(format!("Invalid tools/list result: {}", e)))?;

            all_tools.extend(list_result.tools);

            if list_result.next_cursor.is_none() {
                break;
            }
            cursor = list_result.next_cursor;
        }

        debug!(
            target: "mcp_client",
            server = %self.config.name,
            count = all_tools.len(),
            "Listed tools"
        );

        Ok(all_tools)
    }

    /// Call a tool. Only one call is in flight per connection.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<McpToolResult, McpError> {
        let _gate = self.call_gate.lock().await;
        debug!(target: "mcp_client", server = %self.config.name, tool = %name, "Calling tool");

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };

        let result = self.send_request("tools/call", Some(json!(params))).await?;

        let call_result: McpToolCall = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Invalid tools/call result: {}", e)))?;

        let result = McpToolResult::from(call_result);
        if result.is_error {
            debug!(
                target: "mcp_client",
                server = %self.config.name,
                tool = %name,
                "Tool returned error"
            );
        }

        Ok(result)
    }

    /// Send a JSON-RPC request and wait for response
    async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        // Register pending request
        self.pending.lock().await.insert(id, tx);

        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: json!(id),
            method: method.to_string(),
            params,
        };

        if let Err(e) = self.write_message(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        // Wait for response with timeout
        let response = match timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(McpError::Transport("Response channel closed".to_string()));
            }
            Err(_) => {
                warn!(target: "mcp_client", method = %method, "Request timeout");
                self.pending.lock().await.remove(&id);
                return Err(McpError::Timeout(self.request_timeout));
            }
        };

        // Check for error
        if let Some(error) = response.error {
            return Err(McpError::ServerError(format!(
                "{} (code: {})",
                error.message, error.code
            )));
        }

        response
            .result
            .ok_or_else(|| McpError::Protocol("Missing result in response".to_string()))
    }

    async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let notification = JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        };
        self.write_message(&notification).await
    }

    async fn write_message<T: Serialize>(&self, message: &T) -> Result<(), McpError> {
        let mut guard = self.outbound.lock().await;
        let outbound = guard
            .as_mut()
            .ok_or_else(|| McpError::Transport("Not connected".to_string()))?;

        match outbound {
            Outbound::Stdio(stdin) => {
                let mut line = serde_json::to_string(message)?;
                line.push('\n');

                stdin.write_all(line.as_bytes()).await.map_err(|e| {
                    error!(target: "mcp_client", error = %e, "Failed to write request");
                    McpError::Io(e)
                })?;

                stdin.flush().await.map_err(|e| {
                    error!(target: "mcp_client", error = %e, "Failed to flush stdin");
                    McpError::Io(e)
                })?;
            }
            Outbound::Sse { http, endpoint } => {
                let resp = http
                    .post(endpoint.clone())
                    .json(message)
                    .send()
                    .await
                    .map_err(|e| McpError::Transport(format!("Failed to post message: {}", e)))?;
                if !resp.status().is_success() {
                    return Err(McpError::Transport(format!(
                        "Message endpoint returned status {}",
                        resp.status()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Spawn stdout reader task
    fn spawn_stdout_reader(&self, stdout: ChildStdout) -> JoinHandle<()> {
        let pending = Arc::clone(&self.pending);
        let server_name = self.config.name.clone();

        tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();

            while let Ok(Some(line)) = lines.next_line().await {
                route_message(&pending, &line, &server_name).await;
            }

            fail_pending(&pending).await;
            debug!(target: "mcp_client", server = %server_name, "Stdout reader exited");
        })
    }

    /// Spawn the SSE reader: announces the message endpoint, then routes responses
    fn spawn_sse_reader(
        &self,
        resp: reqwest::Response,
        base: reqwest::Url,
        endpoint_tx: oneshot::Sender<reqwest::Url>,
    ) -> JoinHandle<()> {
        let pending = Arc::clone(&self.pending);
        let server_name = self.config.name.clone();

        tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            let mut decoder = StreamFrameDecoder::new();
            let mut body = resp.bytes_stream();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(target: "mcp_client", server = %server_name, error = %e, "SSE stream read failed");
                        break;
                    }
                };
                for frame in decoder.feed(&chunk) {
                    let fields = frame.fields();
                    let Some(data) = fields.data else {
                        continue;
                    };
                    match fields.event.as_deref() {
                        Some("endpoint") => match base.join(data.trim()) {
                            Ok(endpoint) => {
                                if let Some(tx) = endpoint_tx.take() {
                                    let _ = tx.send(endpoint);
                                }
                            }
                            Err(e) => {
                                warn!(target: "mcp_client", server = %server_name, error = %e, "Invalid endpoint event");
                            }
                        },
                        Some("message") | None => {
                            route_message(&pending, &data, &server_name).await;
                        }
                        Some(other) => {
                            debug!(target: "mcp_client", server = %server_name, event = %other, "Ignoring SSE event");
                        }
                    }
                }
            }

            fail_pending(&pending).await;
            debug!(target: "mcp_client", server = %server_name, "SSE reader exited");
        })
    }

    /// Get server info
    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.lock().await.clone()
    }

    /// Get server capabilities
    pub async fn capabilities(&self) -> Option<ServerCapabilities> {
        self.capabilities.lock().await.clone()
    }
}

/// Deliver one incoming JSON-RPC message to the request waiting for it
async fn route_message(pending: &PendingMap, text: &str, server_name: &str) {
    if text.trim().is_empty() {
        return;
    }

    match serde_json::from_str::<JsonRpcResponse>(text) {
        Ok(response) => match response.id.as_u64() {
            Some(id) => {
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let _ = tx.send(response);
                } else {
                    warn!(
                        target: "mcp_client",
                        server = %server_name,
                        id = id,
                        "Received response for unknown request"
                    );
                }
            }
            None => {
                debug!(target: "mcp_client", server = %server_name, "Ignoring server notification");
            }
        },
        Err(e) => {
            warn!(
                target: "mcp_client",
                server = %server_name,
                error = %e,
                line = %text,
                "Failed to parse JSON-RPC response"
            );
        }
    }
}

/// Drop every waiting sender so callers fail fast instead of timing out
async fn fail_pending(pending: &PendingMap) {
    pending.lock().await.clear();
}

#[async_trait]
impl ToolProvider for McpClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        McpClient::list_tools(self).await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<McpToolResult, McpError> {
        McpClient::call_tool(self, name, arguments).await
    }
}

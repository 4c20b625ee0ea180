// Ingress HTTP server
//
// Accepts a query and streams the session's output back as server-sent events.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::orchestrator::{ChannelSink, Orchestrator, SinkEvent};
use crate::{RelayError, Result};

/// Ingress configuration
#[derive(Clone, Debug)]
pub struct IngressConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            path: "/query".to_string(),
        }
    }
}

impl IngressConfig {
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("RELAY_HOST")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            port: std::env::var("RELAY_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            path: "/query".to_string(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone)]
struct IngressState {
    orchestrator: Arc<Orchestrator>,
}

#[derive(Deserialize)]
struct MessageParams {
    message: Option<String>,
}

/// HTTP front door for orchestration sessions
pub struct IngressServer {
    config: IngressConfig,
    orchestrator: Arc<Orchestrator>,
}

impl IngressServer {
    pub fn new(config: IngressConfig, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    pub fn router(&self) -> Router {
        let state = IngressState {
            orchestrator: Arc::clone(&self.orchestrator),
        };
        Router::new()
            .route(&self.config.path, get(query_get).post(query_post))
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .with_state(state)
    }

    /// Bind the configured address and serve until `shutdown` is cancelled
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let addr = self.config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayError::Config(format!("Failed to bind {addr}: {e}")))?;
        self.serve_with_listener(listener, shutdown).await
    }

    pub async fn serve_with_listener(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let local: SocketAddr = listener.local_addr()?;
        info!(
            target: "ingress",
            url = %format!("http://{}{}", local, self.config.path),
            "Ingress server ready"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!(target: "ingress", "Ingress server stopped");
        Ok(())
    }
}

async fn query_get(
    State(state): State<IngressState>,
    Query(params): Query<MessageParams>,
) -> Response {
    start_session(&state, params.message)
}

async fn query_post(State(state): State<IngressState>, Json(body): Json<MessageParams>) -> Response {
    start_session(&state, body.message)
}

/// Spawn a session and stream its sink events as they are emitted
fn start_session(state: &IngressState, message: Option<String>) -> Response {
    let Some(message) = message.filter(|m| !m.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing message").into_response();
    };

    let cancel = CancellationToken::new();
    let session = state
        .orchestrator
        .session_with_cancel(message, cancel.clone());
    let (sink, rx) = ChannelSink::channel(cancel.clone());
    info!(target: "ingress", session = %session.id(), "Query accepted");

    tokio::spawn(async move {
        let run = session.run(&sink);
        tokio::pin!(run);
        let report = tokio::select! {
            report = &mut run => report,
            _ = sink.closed() => {
                debug!(target: "ingress", "Client disconnected; cancelling session");
                cancel.cancel();
                run.await
            }
        };
        debug!(
            target: "ingress",
            session = %report.session_id,
            state = report.final_state,
            "Session stream closed"
        );
    });

    let stream = UnboundedReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(to_sse(&event)));
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn to_sse(event: &SinkEvent) -> Event {
    let body = event.to_json().to_string();
    match event {
        SinkEvent::Error { .. } => Event::default().event("error").data(body),
        _ => Event::default().data(body),
    }
}

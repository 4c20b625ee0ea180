use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use mockito::{Matcher, ServerGuard};
use relay_core::mcp::{McpError, McpTool, McpToolResult, ToolCatalog, ToolDescriptor, ToolProvider};
use relay_core::orchestrator::OrchestratorOptions;
use relay_core::{
    run_prompt, IngressConfig, IngressServer, ModelClient, ModelClientConfig, Orchestrator,
};
use serde_json::{json, Value};
use tokio::io::AsyncWrite;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Answers every call with a fixed forecast
struct ForecastProvider;

#[async_trait]
impl ToolProvider for ForecastProvider {
    fn name(&self) -> &str {
        "forecast"
    }

    async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        Ok(Vec::new())
    }

    async fn call_tool(&self, _: &str, _: Option<Value>) -> Result<McpToolResult, McpError> {
        Ok(McpToolResult {
            texts: vec![r#"{"conditions":"clear sky"}"#.into()],
            is_error: false,
        })
    }
}

fn orchestrator(base_url: &str) -> Arc<Orchestrator> {
    let cfg = ModelClientConfig {
        endpoint_url: format!("{base_url}/v1/chat/completions"),
        auth_token: None,
        model: "test-model".into(),
        timeout: Duration::from_secs(5),
        decision_max_tokens: 1000,
        narration_max_tokens: 2000,
    };
    let catalog = Arc::new(ToolCatalog::with_tools(vec![ToolDescriptor {
        name: "get-forecast".into(),
        description: "Forecast for a city".into(),
        input_schema: json!({"type": "object"}),
    }]));
    Arc::new(Orchestrator::new(
        ModelClient::new(cfg).unwrap(),
        Arc::new(ForecastProvider),
        catalog,
        OrchestratorOptions::default(),
    ))
}

async fn mock_tool_round(server: &mut ServerGuard) {
    let decision = json!({"choices": [{"message": {"content": null, "tool_calls": [
        {"id": "c1", "type": "function", "function": {"name": "get-forecast", "arguments": "{\"city\":\"hangzhou\"}"}}
    ]}}]});
    server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::PartialJson(json!({"stream": false})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(decision.to_string())
        .create_async()
        .await;
    server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::PartialJson(json!({"stream": true})))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Sunny \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"all day.\"}}]}\n\n",
            "data: [DONE]\n\n",
        ))
        .create_async()
        .await;
}

async fn start(orch: Arc<Orchestrator>) -> (String, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = IngressServer::new(IngressConfig::default(), orch);
    tokio::spawn(server.serve_with_listener(listener, shutdown.clone()));
    (format!("http://{addr}/query"), shutdown)
}

#[tokio::test]
async fn test_get_streams_frames_then_done() {
    let mut model = mockito::Server::new_async().await;
    mock_tool_round(&mut model).await;
    let (url, shutdown) = start(orchestrator(&model.url())).await;

    let resp = reqwest::Client::new()
        .get(&url)
        .query(&[("message", "weather in hangzhou")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = resp.text().await.unwrap();
    let sunny = body.find("Sunny ").unwrap();
    let all_day = body.find("all day.").unwrap();
    assert!(sunny < all_day);
    assert!(body.trim_end().ends_with(r#"data: {"done":true}"#));
    assert!(!body.contains("event: error"));

    shutdown.cancel();
}

#[tokio::test]
async fn test_post_json_body_is_accepted() {
    let mut model = mockito::Server::new_async().await;
    mock_tool_round(&mut model).await;
    let (url, shutdown) = start(orchestrator(&model.url())).await;

    let body = reqwest::Client::new()
        .post(&url)
        .json(&json!({"message": "weather in hangzhou"}))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("all day."));
    assert!(body.contains(r#"{"done":true}"#));

    shutdown.cancel();
}

#[tokio::test]
async fn test_missing_message_is_rejected() {
    let model = mockito::Server::new_async().await;
    let (url, shutdown) = start(orchestrator(&model.url())).await;
    let client = reqwest::Client::new();

    let missing = client.get(&url).send().await.unwrap();
    assert_eq!(missing.status(), 400);

    let blank = client
        .get(&url)
        .query(&[("message", "   ")])
        .send()
        .await
        .unwrap();
    assert_eq!(blank.status(), 400);

    shutdown.cancel();
}

#[tokio::test]
async fn test_decision_failure_ends_with_error_event() {
    let mut model = mockito::Server::new_async().await;
    model
        .mock("POST", "/v1/chat/completions")
        .with_status(500)
        .with_body("model unavailable")
        .create_async()
        .await;
    let (url, shutdown) = start(orchestrator(&model.url())).await;

    let body = reqwest::Client::new()
        .get(&url)
        .query(&[("message", "weather")])
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains("event: error"));
    assert!(body.contains(r#""code":"PROTOCOL_ERROR""#));
    assert!(!body.contains(r#"{"done":true}"#));

    shutdown.cancel();
}

#[tokio::test]
async fn test_prompt_loop_streams_narration() {
    let mut model = mockito::Server::new_async().await;
    mock_tool_round(&mut model).await;
    let orch = orchestrator(&model.url());

    let mut output = Vec::new();
    run_prompt(&orch, &b"weather in hangzhou\n\nQUIT\nnever asked\n"[..], &mut output)
        .await
        .unwrap();
    let text = String::from_utf8(output).unwrap();

    assert!(text.contains("Relay client started!"));
    assert!(text.contains("Sunny all day."));
    // one prompt per line read, including the blank one
    assert_eq!(text.matches("Query: ").count(), 3);
}

#[tokio::test]
async fn test_prompt_loop_reports_errors_and_continues() {
    let mut model = mockito::Server::new_async().await;
    model
        .mock("POST", "/v1/chat/completions")
        .with_status(500)
        .create_async()
        .await;
    let orch = orchestrator(&model.url());

    let mut output = Vec::new();
    run_prompt(&orch, &b"first\nsecond\n"[..], &mut output)
        .await
        .unwrap();
    let text = String::from_utf8(output).unwrap();

    assert_eq!(text.matches("Error (PROTOCOL_ERROR)").count(), 2);
    assert_eq!(text.matches("Query: ").count(), 3);
}

// Model endpoint whose narration stalls after the first delta until released

#[derive(Clone)]
struct SlowNarrator {
    release: Arc<Notify>,
    dropped: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

fn delta_frame(text: &str) -> Result<String, Infallible> {
    let chunk = json!({"choices": [{"delta": {"content": text}}]});
    Ok(format!("data: {chunk}\n\n"))
}

async fn slow_completions(State(fake): State<SlowNarrator>, Json(body): Json<Value>) -> Response {
    if body["stream"] != json!(true) {
        let decision = json!({"choices": [{"message": {"content": null, "tool_calls": [
            {"id": "c1", "type": "function", "function": {"name": "get-forecast", "arguments": "{}"}}
        ]}}]});
        return Json(decision).into_response();
    }

    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let _ = tx.send(delta_frame("first-part ")).await;
        loop {
            tokio::select! {
                _ = fake.release.notified() => break,
                _ = tokio::time::sleep(Duration::from_millis(50)) => {
                    if tx.send(delta_frame(".")).await.is_err() {
                        if let Some(signal) = fake.dropped.lock().unwrap().take() {
                            let _ = signal.send(());
                        }
                        return;
                    }
                }
            }
        }
        let _ = tx.send(delta_frame("last-part")).await;
        let _ = tx.send(Ok("data: [DONE]\n\n".to_string())).await;
    });
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

async fn start_slow_model() -> (String, Arc<Notify>, oneshot::Receiver<()>) {
    let (dropped_tx, dropped_rx) = oneshot::channel();
    let fake = SlowNarrator {
        release: Arc::new(Notify::new()),
        dropped: Arc::new(Mutex::new(Some(dropped_tx))),
    };
    let release = fake.release.clone();
    let app = Router::new()
        .route("/v1/chat/completions", post(slow_completions))
        .with_state(fake);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    (format!("http://{addr}"), release, dropped_rx)
}

async fn read_until(resp: &mut reqwest::Response, seen: &mut String, needle: &str) {
    while !seen.contains(needle) {
        let chunk = resp.chunk().await.unwrap().expect("stream ended early");
        seen.push_str(&String::from_utf8_lossy(&chunk));
    }
}

#[tokio::test]
async fn test_narration_reaches_client_before_session_ends() {
    let (model_url, release, _dropped) = start_slow_model().await;
    let (url, shutdown) = start(orchestrator(&model_url)).await;

    let mut resp = reqwest::Client::new()
        .get(&url)
        .query(&[("message", "weather")])
        .send()
        .await
        .unwrap();

    let mut seen = String::new();
    tokio::time::timeout(
        Duration::from_secs(5),
        read_until(&mut resp, &mut seen, "first-part"),
    )
    .await
    .expect("first delta was not delivered while narration was still open");
    assert!(!seen.contains(r#"{"done":true}"#));
    assert!(!seen.contains("last-part"));

    release.notify_one();
    tokio::time::timeout(
        Duration::from_secs(5),
        read_until(&mut resp, &mut seen, r#"{"done":true}"#),
    )
    .await
    .unwrap();
    assert!(seen.find("first-part").unwrap() < seen.find("last-part").unwrap());
    assert!(seen.trim_end().ends_with(r#"data: {"done":true}"#));

    shutdown.cancel();
}

#[tokio::test]
async fn test_client_disconnect_cancels_session() {
    let (model_url, _release, dropped) = start_slow_model().await;
    let (url, shutdown) = start(orchestrator(&model_url)).await;

    let mut resp = reqwest::Client::new()
        .get(&url)
        .query(&[("message", "weather")])
        .send()
        .await
        .unwrap();
    let mut seen = String::new();
    tokio::time::timeout(
        Duration::from_secs(5),
        read_until(&mut resp, &mut seen, "first-part"),
    )
    .await
    .unwrap();
    drop(resp);

    // The cancelled session drops its narration request, closing the model's stream
    tokio::time::timeout(Duration::from_secs(10), dropped)
        .await
        .expect("narration request was still open after the client left")
        .unwrap();

    shutdown.cancel();
}

/// Accepts output until the narration arrives, then reports a broken pipe
#[derive(Default)]
struct FailingWriter {
    written: Vec<u8>,
}

impl AsyncWrite for FailingWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if String::from_utf8_lossy(buf).contains("first-part") {
            return Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)));
        }
        self.written.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn test_prompt_write_failure_stops_session() {
    let (model_url, _release, dropped) = start_slow_model().await;
    let orch = orchestrator(&model_url);

    let mut output = FailingWriter::default();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        run_prompt(&orch, &b"weather\nsecond query\n"[..], &mut output),
    )
    .await
    .expect("prompt loop kept waiting on a session it could not print");
    assert!(result.is_err());
    assert!(String::from_utf8_lossy(&output.written).contains("Query: "));

    tokio::time::timeout(Duration::from_secs(10), dropped)
        .await
        .unwrap()
        .unwrap();
}

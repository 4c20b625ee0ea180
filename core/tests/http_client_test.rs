use std::time::{Duration, Instant};

use relay_core::{RelayError, SendOptions, SendOutcome, StreamEvent, StreamingClient};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Accepts connections and never answers
async fn silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{addr}/v1/chat/completions")
}

/// Sends one event-stream frame, then holds the connection open
async fn stalled_stream_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                let frame = "data: {\"n\":1}\n\n";
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n{:x}\r\n{frame}\r\n",
                    frame.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                tokio::time::sleep(Duration::from_secs(30)).await;
            });
        }
    });
    format!("http://{addr}/v1/chat/completions")
}

#[tokio::test]
async fn test_json_response_is_delivered_once() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer secret")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices":[{"message":{"content":"hi"}}]}"#)
        .create_async()
        .await;

    let client = StreamingClient::new().unwrap();
    let mut events = Vec::new();
    let outcome = client
        .post(
            &format!("{}/v1/chat/completions", server.url()),
            &json!({"stream": false}),
            SendOptions::default().with_bearer(Some("secret".into())),
            |e| events.push(e),
        )
        .await
        .unwrap();

    mock.assert_async().await;
    let doc = json!({"choices": [{"message": {"content": "hi"}}]});
    assert_eq!(events, vec![StreamEvent::Data(doc.clone())]);
    assert_eq!(outcome, SendOutcome::Document(doc));
}

#[tokio::test]
async fn test_event_stream_forwards_frames_then_done() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "text/event-stream; charset=utf-8")
        .with_body(concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Sun\"}}]}\n\n",
            "data: oops\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ny\"}}]}\n\n",
            "data: [DONE]\n\n",
        ))
        .create_async()
        .await;

    let client = StreamingClient::new().unwrap();
    let mut events = Vec::new();
    let outcome = client
        .post(
            &format!("{}/v1/chat/completions", server.url()),
            &json!({"stream": true}),
            SendOptions::default(),
            |e| events.push(e),
        )
        .await
        .unwrap();

    assert_eq!(events.len(), 4);
    assert_eq!(
        events[0],
        StreamEvent::Data(json!({"choices": [{"delta": {"content": "Sun"}}]}))
    );
    assert!(matches!(events[1], StreamEvent::DecodeError(_)));
    assert_eq!(events[3], StreamEvent::Done);

    match outcome {
        SendOutcome::Stream { envelope, frames } => {
            assert_eq!(frames, 3);
            assert_eq!(
                envelope,
                Some(json!({"choices": [{"delta": {"content": "Sun"}}]}))
            );
        }
        other => panic!("expected a stream outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn test_error_status_is_protocol_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(500)
        .with_body("upstream exploded")
        .create_async()
        .await;

    let client = StreamingClient::new().unwrap();
    let mut called = false;
    let err = client
        .post(
            &format!("{}/v1/chat/completions", server.url()),
            &json!({}),
            SendOptions::default(),
            |_| called = true,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::Protocol(ref m) if m.contains("upstream exploded")));
    assert!(!called);
}

#[tokio::test]
async fn test_non_json_body_is_protocol_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/status")
        .match_query(mockito::Matcher::UrlEncoded("message".into(), "hi there".into()))
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body("plain text")
        .create_async()
        .await;

    let client = StreamingClient::new().unwrap();
    let err = client
        .get(
            &format!("{}/status", server.url()),
            &[("message", "hi there")],
            SendOptions::default(),
            |_| {},
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PROTOCOL_ERROR");
}

#[tokio::test]
async fn test_unreachable_endpoint_is_connection_error() {
    // Bind then drop to get a port nobody listens on
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let client = StreamingClient::new().unwrap();
    let err = client
        .post(&format!("http://{addr}/"), &json!({}), SendOptions::default(), |_| {})
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONNECTION_ERROR");
}

#[tokio::test]
async fn test_timeout_tears_down_request() {
    let url = silent_server().await;
    let client = StreamingClient::new().unwrap();
    let mut called = false;

    let started = Instant::now();
    let err = client
        .post(
            &url,
            &json!({}),
            SendOptions::default().with_timeout(Duration::from_millis(150)),
            |_| called = true,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::Timeout(d) if d == Duration::from_millis(150)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!called);
}

#[tokio::test]
async fn test_cancellation_stops_request() {
    let url = silent_server().await;
    let client = StreamingClient::new().unwrap();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let mut called = false;
    let err = client
        .post(
            &url,
            &json!({}),
            SendOptions::default().with_cancel(cancel),
            |_| called = true,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::Cancelled));
    assert!(!called);
}

#[tokio::test]
async fn test_cancellation_mid_stream_keeps_delivered_frames() {
    let url = stalled_stream_server().await;
    let client = StreamingClient::new().unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let started = Instant::now();
    let mut events = Vec::new();
    let err = client
        .post(
            &url,
            &json!({"stream": true}),
            SendOptions::default()
                .with_timeout(Duration::from_secs(20))
                .with_cancel(cancel),
            |e| {
                if matches!(e, StreamEvent::Data(_)) {
                    trigger.cancel();
                }
                events.push(e);
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::Cancelled));
    assert_eq!(events, vec![StreamEvent::Data(json!({"n": 1}))]);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_cancel_from_callback_drops_buffered_frames() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body("data: {\"n\":1}\n\ndata: {\"n\":2}\n\ndata: [DONE]\n\n")
        .create_async()
        .await;

    let client = StreamingClient::new().unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let mut events = Vec::new();
    let err = client
        .post(
            &format!("{}/v1/chat/completions", server.url()),
            &json!({"stream": true}),
            SendOptions::default().with_cancel(cancel),
            |e| {
                trigger.cancel();
                events.push(e);
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::Cancelled));
    assert_eq!(events, vec![StreamEvent::Data(json!({"n": 1}))]);
}

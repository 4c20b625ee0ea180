use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::Value;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::stream::{Frame, FrameError, StreamFrameDecoder};
use crate::{RelayError, Result};

/// Deadline applied when the caller does not set one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// Callback payload delivered by [`StreamingClient::send`]
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A decoded JSON payload (one per frame, or the whole body for JSON responses)
    Data(Value),
    /// A frame whose payload was not JSON; decoding continues with the next frame
    DecodeError(FrameError),
    /// The event stream closed; no further events follow
    Done,
}

/// Per-request options
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub timeout: Duration,
    /// Caller-owned token; a child token is derived per request
    pub cancel: Option<CancellationToken>,
    pub bearer_token: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            cancel: None,
            bearer_token: None,
            headers: Vec::new(),
        }
    }
}

impl SendOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_bearer(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }
}

/// Result of a completed request
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Non-streaming response: the parsed JSON body
    Document(Value),
    /// Event stream: the first decoded payload plus the number of frames seen
    Stream {
        envelope: Option<Value>,
        frames: usize,
    },
}

impl SendOutcome {
    /// The JSON body, or the first frame of a stream
    pub fn envelope(&self) -> Option<&Value> {
        match self {
            SendOutcome::Document(v) => Some(v),
            SendOutcome::Stream { envelope, .. } => envelope.as_ref(),
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, SendOutcome::Stream { .. })
    }
}

/// True when the response declares an event stream (parameters such as charset are ignored)
pub fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .eq_ignore_ascii_case(EVENT_STREAM_CONTENT_TYPE)
        })
        .unwrap_or(false)
}

/// HTTP client that drives [`StreamFrameDecoder`] over streamed bodies
#[derive(Clone)]
pub struct StreamingClient {
    http: Client,
}

impl StreamingClient {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    /// POST a JSON body
    pub async fn post<F>(
        &self,
        url: &str,
        body: &Value,
        options: SendOptions,
        on_event: F,
    ) -> Result<SendOutcome>
    where
        F: FnMut(StreamEvent),
    {
        self.send(Method::POST, url, Some(body), options, on_event)
            .await
    }

    /// GET with query parameters
    pub async fn get<F>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        options: SendOptions,
        on_event: F,
    ) -> Result<SendOutcome>
    where
        F: FnMut(StreamEvent),
    {
        let url = if query.is_empty() {
            url.to_string()
        } else {
            reqwest::Url::parse_with_params(url, query)
                .map_err(|e| RelayError::Config(format!("Invalid URL {url}: {e}")))?
                .to_string()
        };
        self.send(Method::GET, &url, None, options, on_event).await
    }

    /// Issue a request and deliver its payload(s) to `on_event`.
    ///
    /// Contract:
    /// - JSON response: `on_event` is called once with the parsed body
    /// - event stream: `on_event` is called once per frame, then once with `Done`
    /// - timeout or cancellation drops the connection; `on_event` is not called afterwards
    pub async fn send<F>(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        options: SendOptions,
        mut on_event: F,
    ) -> Result<SendOutcome>
    where
        F: FnMut(StreamEvent),
    {
        let token = options
            .cancel
            .as_ref()
            .map(|t| t.child_token())
            .unwrap_or_default();
        let deadline = tokio::time::sleep(options.timeout);
        tokio::pin!(deadline);

        let started = Instant::now();
        let exchange = self.exchange(&method, url, body, &options, &token, &mut on_event);

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(target: "http_client", %method, url = %url, "Request cancelled");
                Err(RelayError::Cancelled)
            }
            _ = &mut deadline => {
                token.cancel();
                warn!(target: "http_client", %method, url = %url, timeout = ?options.timeout, "Request timed out");
                Err(RelayError::Timeout(options.timeout))
            }
            res = exchange => res,
        };

        debug!(
            target: "http_client",
            %method,
            url = %url,
            ok = result.is_ok(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Request finished"
        );
        result
    }

    async fn exchange<F>(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
        options: &SendOptions,
        token: &CancellationToken,
        on_event: &mut F,
    ) -> Result<SendOutcome>
    where
        F: FnMut(StreamEvent),
    {
        let mut req = self.http.request(method.clone(), url);
        for (name, value) in &options.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &options.bearer_token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| RelayError::Connection(format!("{method} {url} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!(target: "http_client", %status, body = %text, "Upstream returned an error status");
            return Err(RelayError::Protocol(format!(
                "{method} {url} returned status={status} body={text}"
            )));
        }

        if !is_event_stream(resp.headers()) {
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| RelayError::Connection(format!("Failed to read body: {e}")))?;
            let doc: Value = serde_json::from_slice(&bytes)
                .map_err(|e| RelayError::Protocol(format!("Expected a JSON body: {e}")))?;
            on_event(StreamEvent::Data(doc.clone()));
            return Ok(SendOutcome::Document(doc));
        }

        let mut decoder = StreamFrameDecoder::new();
        let mut body = resp.bytes_stream();
        let mut frames = 0usize;
        while let Some(chunk) = body.next().await {
            let chunk = chunk
                .map_err(|e| RelayError::Connection(format!("Stream read failed: {e}")))?;
            for frame in decoder.feed(&chunk) {
                // A callback may cancel; frames after that point are dropped
                if token.is_cancelled() {
                    return Err(RelayError::Cancelled);
                }
                frames += deliver(frame, on_event);
            }
        }
        if token.is_cancelled() {
            return Err(RelayError::Cancelled);
        }
        if let Some(frame) = decoder.finish() {
            frames += deliver(frame, on_event);
            if token.is_cancelled() {
                return Err(RelayError::Cancelled);
            }
        }
        on_event(StreamEvent::Done);

        Ok(SendOutcome::Stream {
            envelope: decoder.into_first_value(),
            frames,
        })
    }
}

fn deliver<F>(frame: Frame, on_event: &mut F) -> usize
where
    F: FnMut(StreamEvent),
{
    if frame.is_done_sentinel() {
        debug!(target: "http_client", "Provider sent [DONE]");
        return 0;
    }
    match frame.value {
        Ok(value) => on_event(StreamEvent::Data(value)),
        Err(e) => {
            warn!(target: "http_client", error = %e, "Skipping undecodable frame");
            on_event(StreamEvent::DecodeError(e));
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn event_stream_detection_ignores_parameters() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream; charset=utf-8"),
        );
        assert!(is_event_stream(&headers));

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(!is_event_stream(&headers));

        assert!(!is_event_stream(&HeaderMap::new()));
    }

    #[test]
    fn outcome_envelope() {
        let doc = SendOutcome::Document(serde_json::json!({"a": 1}));
        assert_eq!(doc.envelope(), Some(&serde_json::json!({"a": 1})));
        assert!(!doc.is_stream());

        let stream = SendOutcome::Stream {
            envelope: None,
            frames: 0,
        };
        assert!(stream.envelope().is_none());
        assert!(stream.is_stream());
    }
}

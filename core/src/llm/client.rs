use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::prompt::ChatMessage;
use crate::http::{SendOptions, SendOutcome, StreamEvent, StreamingClient};
use crate::{RelayError, Result};

/// Model endpoint settings, loaded from environment variables
#[derive(Debug, Clone)]
pub struct ModelClientConfig {
    pub endpoint_url: String, // full chat-completions URL
    pub auth_token: Option<String>,
    pub model: String,
    pub timeout: Duration,
    pub decision_max_tokens: u32,
    pub narration_max_tokens: u32,
}

impl Default for ModelClientConfig {
    fn default() -> Self {
        Self {
            endpoint_url: std::env::var("RELAY_LLM_ENDPOINT")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "http://localhost:8000/v1/chat/completions".to_string()),
            auth_token: std::env::var("RELAY_LLM_API_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            model: std::env::var("RELAY_LLM_MODEL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "qwen2.5-0.5b-instruct".to_string()),
            timeout: Duration::from_millis(
                std::env::var("RELAY_LLM_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(300_000),
            ),
            decision_max_tokens: 1000,
            narration_max_tokens: 2000,
        }
    }
}

/// Client for the decision and narration calls
#[derive(Clone)]
pub struct ModelClient {
    http: StreamingClient,
    cfg: ModelClientConfig,
}

impl ModelClient {
    pub fn new(cfg: ModelClientConfig) -> Result<Self> {
        if cfg.endpoint_url.trim().is_empty() {
            return Err(RelayError::Config("Model endpoint URL is empty".into()));
        }
        Ok(Self {
            http: StreamingClient::new()?,
            cfg,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(ModelClientConfig::default())
    }

    pub fn cfg(&self) -> &ModelClientConfig {
        &self.cfg
    }

    fn options(&self, cancel: &CancellationToken) -> SendOptions {
        SendOptions::default()
            .with_timeout(self.cfg.timeout)
            .with_cancel(cancel.clone())
            .with_bearer(self.cfg.auth_token.clone())
    }

    /// Non-streaming call that lets the model pick tools; returns the raw response document
    pub async fn decide(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let mut body = json!({
            "model": self.cfg.model,
            "max_tokens": self.cfg.decision_max_tokens,
            "messages": messages,
            "stream": false,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(target: "llm", url = %self.cfg.endpoint_url, tools = tools.len(), "Sending decision request");
        let outcome = self
            .http
            .post(&self.cfg.endpoint_url, &body, self.options(cancel), |_| {})
            .await?;

        match outcome {
            SendOutcome::Document(doc) => Ok(doc),
            SendOutcome::Stream { .. } => Err(RelayError::Protocol(
                "Decision call answered with an event stream".into(),
            )),
        }
    }

    /// Streaming call; every decoded frame goes to `on_event` as it arrives
    pub async fn narrate<F>(
        &self,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
        on_event: F,
    ) -> Result<SendOutcome>
    where
        F: FnMut(StreamEvent),
    {
        let body = json!({
            "model": self.cfg.model,
            "max_tokens": self.cfg.narration_max_tokens,
            "messages": messages,
            "stream": true,
        });

        debug!(target: "llm", url = %self.cfg.endpoint_url, "Sending narration request");
        self.http
            .post(&self.cfg.endpoint_url, &body, self.options(cancel), on_event)
            .await
    }
}

use std::sync::Mutex;

use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What a session hands to its caller, in delivery order
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// A narration frame, forwarded verbatim
    Frame(Value),
    /// Text produced without a streaming call (direct answer, local summary)
    Text(String),
    /// Inline report for one failed tool invocation
    ToolError {
        tool: String,
        code: String,
        message: String,
    },
    /// Terminal: the session failed
    Error { code: String, message: String },
    /// Terminal: the session completed
    Done,
}

impl SinkEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SinkEvent::Error { .. } | SinkEvent::Done)
    }

    /// JSON body used on the wire
    pub fn to_json(&self) -> Value {
        match self {
            SinkEvent::Frame(payload) => payload.clone(),
            SinkEvent::Text(content) => json!({"type": "text", "content": content}),
            SinkEvent::ToolError {
                tool,
                code,
                message,
            } => json!({"type": "tool_error", "tool": tool, "code": code, "message": message}),
            SinkEvent::Error { code, message } => json!({"code": code, "message": message}),
            SinkEvent::Done => json!({"done": true}),
        }
    }
}

/// Receives everything a session produces
pub trait OutputSink: Send + Sync {
    fn emit(&self, event: SinkEvent);
}

/// Forwards events into an unbounded channel; a dropped receiver cancels the session
pub struct ChannelSink {
    tx: UnboundedSender<SinkEvent>,
    cancel: CancellationToken,
}

impl ChannelSink {
    pub fn channel(cancel: CancellationToken) -> (Self, UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, cancel }, rx)
    }

    /// Resolves once the receiver is gone
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl OutputSink for ChannelSink {
    fn emit(&self, event: SinkEvent) {
        if self.tx.send(event).is_err() && !self.cancel.is_cancelled() {
            debug!(target: "session", "Output receiver dropped; cancelling session");
            self.cancel.cancel();
        }
    }
}

/// Keeps every event in memory
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl OutputSink for CollectingSink {
    fn emit(&self, event: SinkEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

/// Text carried by one narration frame, if any
pub fn narration_delta(frame: &Value) -> Option<&str> {
    let choice = frame.get("choices").and_then(|c| c.get(0));
    choice
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .or_else(|| {
            choice
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_str())
        })
        .or_else(|| frame.get("msg").and_then(|m| m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_extraction() {
        let chunk = json!({"choices": [{"delta": {"content": "Hang"}}]});
        assert_eq!(narration_delta(&chunk), Some("Hang"));

        let full = json!({"choices": [{"message": {"content": "whole"}}]});
        assert_eq!(narration_delta(&full), Some("whole"));

        let legacy = json!({"success": true, "msg": "ok"});
        assert_eq!(narration_delta(&legacy), Some("ok"));

        let role_only = json!({"choices": [{"delta": {"role": "assistant"}}]});
        assert_eq!(narration_delta(&role_only), None);
    }

    #[test]
    fn wire_shapes() {
        assert_eq!(SinkEvent::Done.to_json(), json!({"done": true}));
        assert!(SinkEvent::Done.is_terminal());
        assert!(!SinkEvent::Text("x".into()).is_terminal());
        let err = SinkEvent::Error {
            code: "TIMEOUT".into(),
            message: "slow".into(),
        };
        assert_eq!(err.to_json(), json!({"code": "TIMEOUT", "message": "slow"}));
    }

    #[tokio::test]
    async fn dropped_receiver_cancels() {
        let cancel = CancellationToken::new();
        let (sink, rx) = ChannelSink::channel(cancel.clone());
        drop(rx);
        sink.emit(SinkEvent::Done);
        assert!(cancel.is_cancelled());
    }
}

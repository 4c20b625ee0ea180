use serde_json::Value;
use tracing::{debug, warn};

use super::utf8::Utf8Accumulator;

/// Separator between two events in a text event stream
pub const FRAME_DELIMITER: &str = "\n\n";

/// Sentinel some model providers send as the last data payload
const DONE_SENTINEL: &str = "[DONE]";

/// Frame payload that could not be parsed as JSON
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("frame payload is not valid JSON: {message}")]
pub struct FrameError {
    /// Payload text after the field prefix was stripped
    pub payload: String,
    pub message: String,
}

/// One delimiter-terminated unit of an event stream
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Text between two delimiters, untouched
    pub raw: String,
    /// Payload parsed as JSON
    pub value: Result<Value, FrameError>,
}

/// Standard SSE fields read from a frame's lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFields {
    pub event: Option<String>,
    pub data: Option<String>,
    pub id: Option<String>,
}

impl Frame {
    pub fn from_raw(raw: String) -> Self {
        let payload = payload_of(&raw);
        let value = serde_json::from_str::<Value>(payload.trim()).map_err(|e| FrameError {
            payload: payload.clone(),
            message: e.to_string(),
        });
        Self { raw, value }
    }

    /// Parsed JSON payload, if the frame decoded
    pub fn json(&self) -> Option<&Value> {
        self.value.as_ref().ok()
    }

    /// Payload text: the `data` field(s) when present, otherwise the raw text
    /// with a leading `name: ` token removed
    pub fn payload_text(&self) -> String {
        payload_of(&self.raw)
    }

    /// True for the provider's `[DONE]` end-of-stream payload
    pub fn is_done_sentinel(&self) -> bool {
        self.payload_text().trim() == DONE_SENTINEL
    }

    /// Read `event:`, `data:` and `id:` lines. Multiple `data` lines are joined with `\n`.
    pub fn fields(&self) -> SseFields {
        parse_fields(&self.raw)
    }
}

fn parse_fields(raw: &str) -> SseFields {
    let mut fields = SseFields::default();
    for line in raw.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => continue,
        };
        match name {
            "event" => fields.event = Some(value.to_string()),
            "id" => fields.id = Some(value.to_string()),
            "data" => match fields.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => fields.data = Some(value.to_string()),
            },
            _ => {}
        }
    }
    fields
}

fn payload_of(raw: &str) -> String {
    if let Some(data) = parse_fields(raw).data {
        return data;
    }
    match raw.split_once(": ") {
        Some((prefix, rest)) if is_field_name(prefix) => rest.to_string(),
        _ => raw.to_string(),
    }
}

fn is_field_name(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Stateful byte-to-frame decoder for one streamed response.
///
/// Frames are only produced once their delimiter has arrived. Text without a
/// delimiter stays buffered until the next `feed` or `finish`. CRLF and bare CR
/// line endings are folded to LF before framing.
#[derive(Debug, Default)]
pub struct StreamFrameDecoder {
    utf8: Utf8Accumulator,
    /// A chunk ended in `\r`; its meaning depends on the next character
    held_cr: bool,
    pending: String,
    first_value: Option<Value>,
    frames_emitted: usize,
}

impl StreamFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of bytes and return every frame it completed, in order
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        if chunk.is_empty() {
            return Vec::new();
        }
        let mut text = self.utf8.decode(chunk);
        if std::mem::take(&mut self.held_cr) {
            text.insert(0, '\r');
        }
        if text.ends_with('\r') {
            text.pop();
            self.held_cr = true;
        }
        self.push_normalized(&text);
        self.drain_complete()
    }

    /// Flush at end of stream. Undelimited trailing text is emitted as a last frame.
    pub fn finish(&mut self) -> Option<Frame> {
        let mut tail = self.utf8.flush();
        if std::mem::take(&mut self.held_cr) {
            tail.insert(0, '\r');
        }
        self.push_normalized(&tail);

        let rest = std::mem::take(&mut self.pending);
        if rest.trim().is_empty() {
            return None;
        }
        warn!(
            target: "stream_decoder",
            bytes = rest.len(),
            "Stream ended without a trailing delimiter; flushing partial frame"
        );
        let frame = Frame::from_raw(rest);
        self.observe(&frame);
        Some(frame)
    }

    /// First JSON payload decoded on this stream (the envelope)
    pub fn first_value(&self) -> Option<&Value> {
        self.first_value.as_ref()
    }

    pub fn into_first_value(self) -> Option<Value> {
        self.first_value
    }

    /// Buffered text waiting for a delimiter
    pub fn buffered(&self) -> &str {
        &self.pending
    }

    pub fn frames_emitted(&self) -> usize {
        self.frames_emitted
    }

    fn push_normalized(&mut self, text: &str) {
        if text.contains('\r') {
            self.pending
                .push_str(&text.replace("\r\n", "\n").replace('\r', "\n"));
        } else {
            self.pending.push_str(text);
        }
    }

    fn drain_complete(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(idx) = self.pending.find(FRAME_DELIMITER) {
            let raw: String = self.pending[..idx].to_string();
            self.pending.drain(..idx + FRAME_DELIMITER.len());
            if raw.is_empty() {
                continue;
            }
            let frame = Frame::from_raw(raw);
            self.observe(&frame);
            frames.push(frame);
        }
        frames
    }

    fn observe(&mut self, frame: &Frame) {
        self.frames_emitted += 1;
        match &frame.value {
            Ok(v) => {
                if self.first_value.is_none() {
                    self.first_value = Some(v.clone());
                }
            }
            Err(e) => {
                debug!(target: "stream_decoder", error = %e, "Frame payload did not decode");
            }
        }
    }
}

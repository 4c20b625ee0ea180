//! Cancellable HTTP client that understands both single JSON bodies and
//! `text/event-stream` responses.

mod client;

pub use client::{
    is_event_stream, SendOptions, SendOutcome, StreamEvent, StreamingClient, DEFAULT_TIMEOUT,
    EVENT_STREAM_CONTENT_TYPE,
};

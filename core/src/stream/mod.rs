//! Incremental event-stream decoding
//!
//! - `StreamFrameDecoder` turns arbitrarily chunked bytes into delimiter-terminated `Frame`s
//! - `Utf8Accumulator` keeps split multi-byte characters across chunk boundaries

mod decoder;
mod utf8;

pub use decoder::{Frame, FrameError, SseFields, StreamFrameDecoder, FRAME_DELIMITER};
pub use utf8::Utf8Accumulator;

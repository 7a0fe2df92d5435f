//! Server-sent-event frame reassembly.
//!
//! The generation endpoint streams frames of the form
//! `event: <type>\ndata: <json>\n\n`. A frame may arrive split across
//! network reads, or several frames may land in one read, so bytes are
//! accumulated in a growing buffer scanned for the blank-line boundary.

use super::{GenerationError, StreamEvent};

/// One reassembled frame, before interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Accumulates raw bytes and yields complete frames.
#[derive(Debug, Default)]
pub struct SseFrameBuffer {
    buf: Vec<u8>,
}

impl SseFrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network read into the buffer.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if the boundary has arrived. Comment
    /// frames and frames without any field are skipped.
    pub fn next_frame(&mut self) -> Option<SseFrame> {
        loop {
            let boundary = find_boundary(&self.buf)?;
            let frame_bytes: Vec<u8> = self.buf.drain(..boundary.end).collect();
            let text = String::from_utf8_lossy(&frame_bytes[..boundary.start]).into_owned();
            if let Some(frame) = parse_frame(&text) {
                return Some(frame);
            }
            // Keep-alive comment or empty frame; scan for the next one.
        }
    }

    /// Bytes buffered past the last complete frame.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

struct Boundary {
    /// Length of the frame body (exclusive of the separator).
    start: usize,
    /// Length of body plus separator.
    end: usize,
}

/// Find the first blank-line separator, tolerating CRLF line endings.
fn find_boundary(buf: &[u8]) -> Option<Boundary> {
    let mut i = 0;
    while i < buf.len() {
        if buf[i..].starts_with(b"\n\n") {
            return Some(Boundary {
                start: i,
                end: i + 2,
            });
        }
        if buf[i..].starts_with(b"\r\n\r\n") {
            return Some(Boundary {
                start: i,
                end: i + 4,
            });
        }
        i += 1;
    }
    None
}

fn parse_frame(text: &str) -> Option<SseFrame> {
    let mut event = String::new();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
        // Comment lines (":keep-alive") and unknown fields are ignored.
    }

    if event.is_empty() && data_lines.is_empty() {
        return None;
    }
    if event.is_empty() {
        // The default event type for a data-only frame.
        event = "message".to_string();
    }

    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

/// Interpret a frame as a channel event. Unknown event types yield `None`
/// and are skipped by the caller.
pub fn decode_frame(frame: &SseFrame) -> Result<Option<StreamEvent>, GenerationError> {
    match frame.event.as_str() {
        "message" => {
            let chunk: String = serde_json::from_str(&frame.data).map_err(|e| {
                GenerationError::Protocol(format!("bad message payload: {e}"))
            })?;
            Ok(Some(StreamEvent::Chunk(chunk)))
        }
        "done" => Ok(Some(StreamEvent::Done)),
        "error" => {
            #[derive(serde::Deserialize)]
            struct ErrorPayload {
                message: String,
            }
            let payload: ErrorPayload = serde_json::from_str(&frame.data).map_err(|e| {
                GenerationError::Protocol(format!("bad error payload: {e}"))
            })?;
            Ok(Some(StreamEvent::Failed(payload.message)))
        }
        _ => Ok(None),
    }
}

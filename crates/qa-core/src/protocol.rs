//! Answer stream protocol.
//!
//! Events travel as server-sent-event frames:
//!
//! ```text
//! event: status
//! data: Searching documents
//!
//! event: token
//! data:  Paris
//!
//! event: error
//! data: {"code":"GENERATION_ERROR","stage":"generating","message":"..."}
//!
//! event: done
//! data: [DONE]
//!
//! ```
//!
//! Exactly one `error` or `done` frame ends a stream. A stream that ends
//! without one was cut short and must be treated as a failure.
//!
//! The decoding side buffers input until a frame boundary is seen, so bytes
//! may arrive split anywhere, including inside a UTF-8 sequence.

use crate::error::{QaError, Result};
use crate::types::{ErrorPayload, StreamEvent};

pub const EVENT_STATUS: &str = "status";
pub const EVENT_TOKEN: &str = "token";
pub const EVENT_ERROR: &str = "error";
pub const EVENT_DONE: &str = "done";

/// Data carried by the `done` frame.
pub const DONE_DATA: &str = "[DONE]";

/// Longest line the decoders accept before giving up.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// One server-sent-event frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    /// Event name; `None` means the default `message` event.
    pub event: Option<String>,

    /// Payload, lines joined with `\n`.
    pub data: String,
}

impl Frame {
    /// Build a frame. Carriage returns in `data` are normalized to `\n`,
    /// since SSE cannot carry them.
    pub fn new(event: &str, data: &str) -> Self {
        Self {
            event: Some(event.to_string()),
            data: data.replace("\r\n", "\n").replace('\r', "\n"),
        }
    }

    /// Serialize to wire text, terminated by the blank line.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + 24);
        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// Map an event onto its frame.
pub fn encode_event(event: &StreamEvent) -> Frame {
    match event {
        StreamEvent::Status(text) => Frame::new(EVENT_STATUS, text),
        StreamEvent::Token(text) => Frame::new(EVENT_TOKEN, text),
        StreamEvent::Error(payload) => {
            let data = serde_json::to_string(payload).unwrap_or_else(|_| {
                format!(r#"{{"code":"{}","message":"unserializable error"}}"#, payload.code)
            });
            Frame::new(EVENT_ERROR, &data)
        }
        StreamEvent::Done => Frame::new(EVENT_DONE, DONE_DATA),
    }
}

/// Map a frame back onto an event.
///
/// Unnamed frames are read as tokens, which is how plain `data:`-only
/// producers stream text.
pub fn decode_event(frame: Frame) -> Result<StreamEvent> {
    match frame.event.as_deref() {
        Some(EVENT_STATUS) => Ok(StreamEvent::Status(frame.data)),
        Some(EVENT_TOKEN) | Some("message") | None => Ok(StreamEvent::Token(frame.data)),
        Some(EVENT_ERROR) => {
            let payload: ErrorPayload = serde_json::from_str(&frame.data)
                .map_err(|e| QaError::protocol(format!("Malformed error payload: {}", e)))?;
            Ok(StreamEvent::Error(payload))
        }
        Some(EVENT_DONE) => Ok(StreamEvent::Done),
        Some(other) => Err(QaError::protocol(format!("Unknown event type: {}", other))),
    }
}

/// Splits a byte stream into complete lines.
///
/// Accepts `\n` and `\r\n` line endings. Bytes after the last newline stay
/// buffered until more input arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    /// Prefix of `buf` already known to hold no newline.
    scanned: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every line completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(offset) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
            let pos = self.scanned + offset;
            self.scanned = 0;
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(
                String::from_utf8(line)
                    .map_err(|e| QaError::protocol(format!("Invalid UTF-8 in stream: {}", e)))?,
            );
        }
        self.scanned = self.buf.len();

        if self.buf.len() > MAX_LINE_BYTES {
            return Err(QaError::protocol(format!(
                "Line exceeds {} bytes",
                MAX_LINE_BYTES
            )));
        }

        Ok(lines)
    }

    /// Take whatever is left after the last newline.
    pub fn finish(&mut self) -> Result<Option<String>> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        let line = String::from_utf8(rest)
            .map_err(|e| QaError::protocol(format!("Invalid UTF-8 in stream: {}", e)))?;
        Ok(Some(line.trim_end_matches('\r').to_string()))
    }

    /// Whether bytes are waiting for a newline.
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }
}

/// Incremental server-sent-event frame decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    lines: LineBuffer,
    event: Option<String>,
    data: Vec<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every frame completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        for line in self.lines.push(chunk)? {
            if let Some(frame) = self.feed_line(&line) {
                frames.push(frame);
            }
        }
        Ok(frames)
    }

    /// Whether a partially received frame is buffered.
    pub fn has_partial(&self) -> bool {
        self.lines.has_pending() || self.event.is_some() || !self.data.is_empty()
    }

    fn feed_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            if self.event.is_none() && self.data.is_empty() {
                return None;
            }
            let frame = Frame {
                event: self.event.take(),
                data: self.data.join("\n"),
            };
            self.data.clear();
            return Some(frame);
        }

        // Comment, used for keep-alive.
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(i) => {
                let value = &line[i + 1..];
                (&line[..i], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id, retry and unknown fields carry nothing we use
            _ => {}
        }
        None
    }
}

/// Client-side consumer of an answer stream.
///
/// Feed it raw bytes as they arrive; call [`AnswerReader::finish`] when the
/// connection closes to learn whether the stream ended properly.
#[derive(Debug, Default)]
pub struct AnswerReader {
    decoder: FrameDecoder,
    terminated: bool,
    /// Frames seen after the terminal event.
    trailing: usize,
}

impl AnswerReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the events completed by `chunk`.
    ///
    /// Frames after the terminal event are dropped and reported by
    /// [`AnswerReader::finish`].
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>> {
        let mut events = Vec::new();
        for frame in self.decoder.push(chunk)? {
            if self.terminated {
                self.trailing += 1;
                continue;
            }
            let event = decode_event(frame)?;
            self.terminated = event.is_terminal();
            events.push(event);
        }
        Ok(events)
    }

    /// Whether the terminal event has been seen.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Close the reader. Fails if the stream never delivered its terminal
    /// event or kept sending after it.
    pub fn finish(self) -> Result<()> {
        if !self.terminated {
            return Err(QaError::StreamTruncated);
        }
        if self.trailing > 0 {
            return Err(QaError::protocol(format!(
                "{} event(s) received after terminal event",
                self.trailing
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_events() -> Vec<StreamEvent> {
        vec![
            StreamEvent::Status("Searching documents".to_string()),
            StreamEvent::Token("Paris".to_string()),
            StreamEvent::Token(" is".to_string()),
            StreamEvent::Token(" the capital.\nÉté ☀".to_string()),
            StreamEvent::Done,
        ]
    }

    fn encode_all(events: &[StreamEvent]) -> String {
        events.iter().map(|e| encode_event(e).encode()).collect()
    }

    #[test]
    fn test_frame_encoding() {
        let frame = encode_event(&StreamEvent::Token(" Paris".to_string()));
        assert_eq!(frame.encode(), "event: token\ndata:  Paris\n\n");

        let frame = encode_event(&StreamEvent::Done);
        assert_eq!(frame.encode(), "event: done\ndata: [DONE]\n\n");
    }

    #[test]
    fn test_multiline_and_carriage_returns() {
        let frame = Frame::new(EVENT_TOKEN, "a\r\nb\rc");
        assert_eq!(frame.data, "a\nb\nc");
        assert_eq!(
            frame.encode(),
            "event: token\ndata: a\ndata: b\ndata: c\n\n"
        );
    }

    #[test]
    fn test_decoding_survives_any_split_point() {
        let events = sample_events();
        let wire = encode_all(&events);
        let bytes = wire.as_bytes();

        for split in 0..=bytes.len() {
            let mut reader = AnswerReader::new();
            let mut decoded = reader.push(&bytes[..split]).unwrap();
            decoded.extend(reader.push(&bytes[split..]).unwrap());
            assert_eq!(decoded, events, "split at byte {}", split);
            reader.finish().unwrap();
        }
    }

    #[test]
    fn test_decoding_byte_by_byte() {
        let events = sample_events();
        let wire = encode_all(&events);

        let mut reader = AnswerReader::new();
        let mut decoded = Vec::new();
        for b in wire.as_bytes() {
            decoded.extend(reader.push(std::slice::from_ref(b)).unwrap());
        }
        assert_eq!(decoded, events);
    }

    #[test]
    fn test_error_event_payload() {
        let payload = ErrorPayload {
            code: "GENERATION_ERROR".to_string(),
            stage: Some("generating".to_string()),
            message: "Generation error: connection reset".to_string(),
        };
        let wire = encode_event(&StreamEvent::Error(payload.clone())).encode();

        let mut reader = AnswerReader::new();
        let events = reader.push(wire.as_bytes()).unwrap();
        assert_eq!(events, vec![StreamEvent::Error(payload)]);
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn test_missing_terminal_is_truncation() {
        let wire = encode_all(&[
            StreamEvent::Status("Generating answer".to_string()),
            StreamEvent::Token("Par".to_string()),
        ]);

        let mut reader = AnswerReader::new();
        let events = reader.push(wire.as_bytes()).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(reader.finish(), Err(QaError::StreamTruncated)));
    }

    #[test]
    fn test_incomplete_terminal_frame_is_not_dispatched() {
        let mut reader = AnswerReader::new();
        let events = reader.push(b"event: done\ndata: [DONE]\n").unwrap();
        assert!(events.is_empty());
        assert!(reader.finish().is_err());
    }

    #[test]
    fn test_event_after_terminal_keeps_earlier_events() {
        let wire = encode_all(&[
            StreamEvent::Token("a".to_string()),
            StreamEvent::Done,
            StreamEvent::Token("late".to_string()),
        ]);

        let mut reader = AnswerReader::new();
        let events = reader.push(wire.as_bytes()).unwrap();
        assert_eq!(events, vec![StreamEvent::Token("a".to_string()), StreamEvent::Done]);
        assert!(reader.is_terminated());

        let err = reader.finish().unwrap_err();
        assert_eq!(err.error_code(), "PROTOCOL_ERROR");
    }

    #[test]
    fn test_comments_and_ids_ignored() {
        let wire = ": keep-alive\n\nid: 7\nevent: token\ndata:hi\n\n";
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(wire.as_bytes()).unwrap();
        assert_eq!(frames, vec![Frame::new(EVENT_TOKEN, "hi")]);
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_unnamed_frames_are_tokens() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"data: hello\n\n").unwrap();
        assert_eq!(
            decode_event(frames[0].clone()).unwrap(),
            StreamEvent::Token("hello".to_string())
        );
    }

    #[test]
    fn test_unknown_event_rejected() {
        let frame = Frame::new("mystery", "x");
        assert!(decode_event(frame).is_err());
    }

    #[test]
    fn test_line_buffer_crlf_and_remainder() {
        let mut lines = LineBuffer::new();
        assert_eq!(lines.push(b"one\r\ntw").unwrap(), vec!["one".to_string()]);
        assert!(lines.has_pending());
        assert_eq!(lines.push(b"o\n").unwrap(), vec!["two".to_string()]);
        lines.push(b"{\"done\":true}").unwrap();
        assert_eq!(lines.finish().unwrap().as_deref(), Some("{\"done\":true}"));
        assert_eq!(lines.finish().unwrap(), None);
    }

    #[test]
    fn test_line_buffer_long_line_in_small_chunks() {
        let mut lines = LineBuffer::new();
        let line = "x".repeat(10_000);
        for chunk in line.as_bytes().chunks(7) {
            assert!(lines.push(chunk).unwrap().is_empty());
        }
        assert_eq!(lines.scanned, line.len());

        let done = lines.push(b"\nnext").unwrap();
        assert_eq!(done, vec![line]);
        assert_eq!(lines.scanned, 4);
        assert_eq!(lines.push(b"\n").unwrap(), vec!["next".to_string()]);
    }

    #[test]
    fn test_line_buffer_rejects_oversized_line() {
        let mut lines = LineBuffer::new();
        let big = vec![b'a'; MAX_LINE_BYTES + 1];
        assert!(lines.push(&big).is_err());
    }
}

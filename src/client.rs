//! Consumer side of the NDJSON chat stream.
//!
//! [`StreamConsumer`] reassembles frames from arbitrarily split byte chunks
//! and folds them into the response text. [`consume`] drives a whole byte
//! stream, such as `reqwest::Response::bytes_stream()` or an axum body.

use futures::{Stream, StreamExt};
use serde_json::Value;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Finished,
    Error(String),
    Heartbeat,
    /// Well-formed JSON in a shape this consumer does not know.
    Unknown(Value),
}

impl Frame {
    /// Parse one line. Blank or non-JSON lines yield `None`.
    pub fn parse(line: &str) -> Option<Frame> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed stream line");
                return None;
            }
        };

        if let Some(text) = value.get("text").and_then(Value::as_str) {
            return Some(Frame::Text(text.to_string()));
        }
        if let Some(message) = value.get("error") {
            let message = message
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| message.to_string());
            return Some(Frame::Error(message));
        }
        if value.get("finished").and_then(Value::as_bool) == Some(true) {
            return Some(Frame::Finished);
        }
        if value.get("type").and_then(Value::as_str) == Some("heartbeat") {
            return Some(Frame::Heartbeat);
        }
        Some(Frame::Unknown(value))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::Finished | Frame::Error(_))
    }
}

/// Where the consumed stream stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerStatus {
    /// No terminal frame yet.
    Streaming,
    Finished,
    /// Terminal `{error}` frame, or a transport failure while reading.
    Failed(String),
    /// The byte stream ended without a terminal frame.
    Truncated,
}

/// Final result of [`consume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedStream {
    /// Text assembled up to the terminal frame. Kept on failure.
    pub text: String,
    pub status: ConsumerStatus,
    pub heartbeats: usize,
}

/// Incremental NDJSON frame reassembler.
#[derive(Debug)]
pub struct StreamConsumer {
    buffer: Vec<u8>,
    text: String,
    status: ConsumerStatus,
    heartbeats: usize,
    frames: usize,
}

impl Default for StreamConsumer {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            text: String::new(),
            status: ConsumerStatus::Streaming,
            heartbeats: 0,
            frames: 0,
        }
    }
}

impl StreamConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns the frames completed by them.
    ///
    /// Frames after the first terminal one are returned but not applied.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(frame) = self.parse_line(&line) {
                self.apply(&frame);
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing line that had no newline.
    pub fn finish(&mut self) -> Option<Frame> {
        let line = std::mem::take(&mut self.buffer);
        let frame = self.parse_line(&line)?;
        self.apply(&frame);
        Some(frame)
    }

    fn parse_line(&self, line: &[u8]) -> Option<Frame> {
        if line.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        Frame::parse(&String::from_utf8_lossy(line))
    }

    fn apply(&mut self, frame: &Frame) {
        if self.is_terminal() {
            return;
        }
        self.frames += 1;
        match frame {
            Frame::Text(text) => self.text.push_str(text),
            Frame::Finished => self.status = ConsumerStatus::Finished,
            Frame::Error(message) => self.status = ConsumerStatus::Failed(message.clone()),
            Frame::Heartbeat => self.heartbeats += 1,
            Frame::Unknown(_) => {}
        }
    }

    /// Text assembled so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn status(&self) -> &ConsumerStatus {
        &self.status
    }

    pub fn heartbeats(&self) -> usize {
        self.heartbeats
    }

    /// Frames applied so far, of any kind. Useful as a liveness counter.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ConsumerStatus::Finished | ConsumerStatus::Failed(_)
        )
    }

    fn into_result(self) -> ConsumedStream {
        ConsumedStream {
            text: self.text,
            status: self.status,
            heartbeats: self.heartbeats,
        }
    }
}

/// Read `stream` until a terminal frame or the end of the bytes.
pub async fn consume<S, B, E>(stream: S) -> ConsumedStream
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    futures::pin_mut!(stream);
    let mut consumer = StreamConsumer::new();

    while let Some(next) = stream.next().await {
        match next {
            Ok(bytes) => {
                consumer.push(bytes.as_ref());
                if consumer.is_terminal() {
                    return consumer.into_result();
                }
            }
            Err(e) => {
                consumer.status = ConsumerStatus::Failed(format!("Stream interrupted: {}", e));
                return consumer.into_result();
            }
        }
    }

    consumer.finish();
    if !consumer.is_terminal() {
        consumer.status = ConsumerStatus::Truncated;
    }
    consumer.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_parse_frames() {
        assert_eq!(Frame::parse(r#"{"text":"Hel"}"#), Some(Frame::Text("Hel".into())));
        assert_eq!(Frame::parse(r#"{"finished":true}"#), Some(Frame::Finished));
        assert_eq!(Frame::parse(r#"{"error":"boom"}"#), Some(Frame::Error("boom".into())));
        assert_eq!(Frame::parse(r#"{"type":"heartbeat"}"#), Some(Frame::Heartbeat));
        assert!(matches!(Frame::parse(r#"{"usage":{}}"#), Some(Frame::Unknown(_))));
        assert_eq!(Frame::parse("not json"), None);
        assert_eq!(Frame::parse("   "), None);
    }

    #[test]
    fn test_partial_lines_are_buffered() {
        let mut consumer = StreamConsumer::new();
        assert!(consumer.push(b"{\"te").is_empty());
        assert!(consumer.push(b"xt\":\"Hel\"}").is_empty());
        let frames = consumer.push(b"\n{\"text\":\"lo\"}\n{\"fini");
        assert_eq!(frames.len(), 2);
        assert_eq!(consumer.text(), "Hello");
        assert_eq!(consumer.status(), &ConsumerStatus::Streaming);

        consumer.push(b"shed\":true}\n");
        assert_eq!(consumer.status(), &ConsumerStatus::Finished);
    }

    #[test]
    fn test_heartbeats_do_not_touch_text() {
        let mut consumer = StreamConsumer::new();
        consumer.push(b"{\"type\":\"heartbeat\"}\n{\"text\":\"a\"}\n{\"type\":\"heartbeat\"}\n");
        assert_eq!(consumer.text(), "a");
        assert_eq!(consumer.heartbeats(), 2);
        assert_eq!(consumer.frames(), 3);
    }

    #[test]
    fn test_error_is_terminal_and_keeps_text() {
        let mut consumer = StreamConsumer::new();
        consumer.push(b"{\"text\":\"Hel\"}\n{\"text\":\"lo\"}\n{\"error\":\"connection lost\"}\n");
        consumer.push(b"{\"text\":\"ignored\"}\n{\"finished\":true}\n");

        assert_eq!(consumer.text(), "Hello");
        assert_eq!(
            consumer.status(),
            &ConsumerStatus::Failed("connection lost".into())
        );
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut consumer = StreamConsumer::new();
        consumer.push(b"{\"text\":\"x\"}\n{\"finished\":true}");
        assert!(!consumer.is_terminal());
        assert_eq!(consumer.finish(), Some(Frame::Finished));
        assert!(consumer.is_terminal());
    }

    #[tokio::test]
    async fn test_consume_split_stream() {
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"{\"text\":\"Hel".to_vec()),
            Ok(b"\"}\n{\"type\":\"heartbeat\"}\n{\"text\":\"lo\"}".to_vec()),
            Ok(b"\n{\"finished\":true}\n".to_vec()),
        ];

        let result = consume(stream::iter(chunks)).await;
        assert_eq!(result.text, "Hello");
        assert_eq!(result.status, ConsumerStatus::Finished);
        assert_eq!(result.heartbeats, 1);
    }

    #[tokio::test]
    async fn test_consume_transport_error_keeps_text() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"{\"text\":\"Hel\"}\n".to_vec()),
            Err("reset by peer".to_string()),
        ];

        let result = consume(stream::iter(chunks)).await;
        assert_eq!(result.text, "Hel");
        assert!(matches!(result.status, ConsumerStatus::Failed(ref m) if m.contains("reset by peer")));
    }

    #[tokio::test]
    async fn test_consume_truncated_stream() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![Ok(b"{\"text\":\"partial\"}\n".to_vec())];

        let result = consume(stream::iter(chunks)).await;
        assert_eq!(result.text, "partial");
        assert_eq!(result.status, ConsumerStatus::Truncated);
    }
}

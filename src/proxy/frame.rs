//! NDJSON wire frames sent from the gateway to clients.
//!
//! Every frame is one JSON object on its own line, in one of four shapes:
//!
//! ```text
//! {"text": "<delta>"}
//! {"finished": true}
//! {"error": "<message>"}
//! {"type": "heartbeat"}
//! ```

use bytes::Bytes;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// A single unit of the output stream. Exactly one tag per frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    Text(String),
    Error(String),
    Finished,
    Heartbeat,
}

impl StreamChunk {
    /// Whether this frame ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamChunk::Finished | StreamChunk::Error(_))
    }

    /// Serialize as one newline-terminated NDJSON line.
    pub fn to_ndjson(&self) -> serde_json::Result<Bytes> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    }
}

impl Serialize for StreamChunk {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            StreamChunk::Text(text) => map.serialize_entry("text", text)?,
            StreamChunk::Error(message) => map.serialize_entry("error", message)?,
            StreamChunk::Finished => map.serialize_entry("finished", &true)?,
            StreamChunk::Heartbeat => map.serialize_entry("type", "heartbeat")?,
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(chunk: StreamChunk) -> String {
        String::from_utf8(chunk.to_ndjson().unwrap().to_vec()).unwrap()
    }

    #[test]
    fn frames_match_wire_shapes() {
        assert_eq!(line(StreamChunk::Text("Hel".into())), "{\"text\":\"Hel\"}\n");
        assert_eq!(line(StreamChunk::Finished), "{\"finished\":true}\n");
        assert_eq!(line(StreamChunk::Error("boom".into())), "{\"error\":\"boom\"}\n");
        assert_eq!(line(StreamChunk::Heartbeat), "{\"type\":\"heartbeat\"}\n");
    }

    #[test]
    fn embedded_newlines_stay_on_one_line() {
        let encoded = line(StreamChunk::Text("a\nb\n".into()));
        assert_eq!(encoded.matches('\n').count(), 1);
        assert!(encoded.ends_with('\n'));
    }

    #[test]
    fn terminal_frames() {
        assert!(StreamChunk::Finished.is_terminal());
        assert!(StreamChunk::Error("x".into()).is_terminal());
        assert!(!StreamChunk::Text("x".into()).is_terminal());
        assert!(!StreamChunk::Heartbeat.is_terminal());
    }
}

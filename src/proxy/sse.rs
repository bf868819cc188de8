//! Line-buffered decoding of upstream Server-Sent Events.
//!
//! Provides [`SseDecoder`], which reassembles SSE lines across TCP chunk
//! boundaries and yields the payload of each `data:` line. Only `data:`
//! lines matter to OpenAI-compatible streams; `event:`, `id:`, `retry:`
//! and comment lines are skipped.

/// Longest partial line kept while waiting for a newline.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// One decoded SSE item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Payload of a `data:` line (without the prefix).
    Data(String),
    /// The `data: [DONE]` sentinel.
    Done,
}

/// Incremental SSE decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Create a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes; returns events completed by this chunk.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(event) = Self::process_line(&line[..line.len() - 1]) {
                events.push(event);
            }
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            tracing::warn!(
                buffered = self.buffer.len(),
                "SSE line exceeded buffer cap, discarding"
            );
            self.buffer.clear();
        }

        events
    }

    /// Flush any trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        Self::process_line(&line)
    }

    /// Process a single complete SSE line (newline already stripped).
    fn process_line(line: &[u8]) -> Option<SseEvent> {
        let line = std::str::from_utf8(line).ok()?;
        let line = line.strip_suffix('\r').unwrap_or(line);

        let data = line.strip_prefix("data:")?;
        let data = data.strip_prefix(' ').unwrap_or(data);

        if data == "[DONE]" {
            Some(SseEvent::Done)
        } else if data.is_empty() {
            None
        } else {
            Some(SseEvent::Data(data.to_string()))
        }
    }
}

//! Incremental parser for the server's `GET /sse` event stream.
//!
//! Chunks arrive at arbitrary byte boundaries, including in the middle of a
//! multi-byte character, so raw bytes are buffered until a full line is
//! available. A line that outgrows the limit is dropped together with the
//! event it belongs to.

use tracing::warn;

/// A dispatched SSE event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
    /// Value of the `id:` field, if any
    pub id: Option<String>,
}

impl SseEvent {
    /// First `limit` characters of the data, for logging.
    pub fn preview(&self, limit: usize) -> &str {
        match self.data.char_indices().nth(limit) {
            Some((idx, _)) => &self.data[..idx],
            None => &self.data,
        }
    }

    pub fn has_data(&self) -> bool {
        !self.data.trim().is_empty()
    }
}

/// Longest line buffered while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug)]
pub struct SseParser {
    pending: Vec<u8>,
    /// Bytes of `pending` already known to hold no newline
    scanned: usize,
    max_line: usize,
    /// Skipping the rest of an oversized line
    discarding: bool,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            max_line,
            discarding: false,
            event: None,
            data: Vec::new(),
            id: None,
        }
    }

    /// Bytes waiting for the end of their line.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Feed a chunk and collect every event it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = buf[from..].iter().position(|&b| b == b'\n') {
            let end = from + offset;
            if self.discarding {
                self.discarding = false;
            } else {
                let line = String::from_utf8_lossy(&buf[start..end]);
                let line = line.trim_end_matches('\r');
                if line.is_empty() {
                    if let Some(event) = self.dispatch() {
                        events.push(event);
                    }
                } else {
                    self.apply_line(line);
                }
            }
            start = end + 1;
            from = start;
        }
        buf.drain(..start);

        if self.discarding {
            buf.clear();
        } else if buf.len() > self.max_line {
            warn!(bytes = buf.len(), "SSE line too long, dropping the current event");
            buf.clear();
            self.discarding = true;
            self.event = None;
            self.data.clear();
            self.id = None;
        }

        self.scanned = buf.len();
        self.pending = buf;
        events
    }

    fn apply_line(&mut self, line: &str) {
        // Comment / keep-alive
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }

        Some(SseEvent {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
            id,
        })
    }

    /// Drop any partial line or event, used when a stream is reopened.
    pub fn reset(&mut self) {
        *self = Self::with_max_line(self.max_line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_event() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: endpoint\ndata: /mcp?session=abc\n\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("endpoint"));
        assert_eq!(events[0].data, "/mcp?session=abc");
    }

    #[test]
    fn test_keepalive_comment_produces_nothing() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b": ping\n\n").is_empty());
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"id: 4\nda").is_empty());
        assert!(parser.feed(b"ta: {\"progress\":").is_empty());

        let events = parser.feed(b" 50}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"progress\": 50}");
        assert_eq!(events[0].id.as_deref(), Some("4"));
    }

    #[test]
    fn test_multibyte_character_split() {
        let text = "data: 北京到上海\n\n".as_bytes();
        let (head, tail) = text.split_at(8);

        let mut parser = SseParser::new();
        assert!(parser.feed(head).is_empty());
        let events = parser.feed(tail);
        assert_eq!(events[0].data, "北京到上海");
    }

    #[test]
    fn test_multiline_data_and_preview() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: first\ndata: second\n\n");

        assert_eq!(events[0].data, "first\nsecond");
        assert_eq!(events[0].preview(3), "fir");
        assert_eq!(events[0].preview(100), "first\nsecond");
    }

    #[test]
    fn test_blank_data_event() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: message\ndata: \n\n");
        assert_eq!(events.len(), 1);
        assert!(!events[0].has_data());
    }

    #[test]
    fn test_oversized_line_is_dropped() {
        let mut parser = SseParser::with_max_line(16);
        assert!(parser.feed(b"event: progress\n").is_empty());
        assert!(parser.feed(b"data: 0123456789abcdef").is_empty());
        assert_eq!(parser.buffered(), 0);

        // The tail of the long line is skipped, its event never dispatches
        assert!(parser.feed(b"ghijkl\n\n").is_empty());
        assert_eq!(parser.buffered(), 0);

        let events = parser.feed(b"data: ok\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, None);
        assert_eq!(events[0].data, "ok");
    }

    #[test]
    fn test_many_small_chunks() {
        let mut parser = SseParser::new();
        let body = b"event: message\ndata: {\"date\": \"2026-10-18\"}\n\n";
        let mut events = Vec::new();
        for byte in body.chunks(1) {
            events.extend(parser.feed(byte));
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"date\": \"2026-10-18\"}");
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_reset_discards_partial_state() {
        let mut parser = SseParser::new();
        parser.feed(b"event: message\ndata: half");
        parser.reset();
        let events = parser.feed(b"data: fresh\n\n");
        assert_eq!(events[0].event, None);
        assert_eq!(events[0].data, "fresh");
    }
}

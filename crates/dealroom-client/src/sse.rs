//! Incremental Server-Sent Events decoder.
//!
//! Buffers chunked response bytes, splits on newlines and yields the joined
//! `data:` payload of each event when its terminating blank line arrives.
//! Comments and `event:`/`id:`/`retry:` fields are skipped.

use bytes::BytesMut;

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    /// `data:` lines of the event being assembled.
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            data: Vec::new(),
        }
    }

    /// Feed one chunk; returns every event payload it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut ready = Vec::new();

        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line_bytes = self.buffer.split_to(newline_pos + 1);
            line_bytes.truncate(line_bytes.len() - 1);
            if line_bytes.last() == Some(&b'\r') {
                line_bytes.truncate(line_bytes.len() - 1);
            }

            let Ok(line) = std::str::from_utf8(&line_bytes) else {
                tracing::debug!("sse: skipping invalid utf-8 line");
                continue;
            };
            if let Some(payload) = self.feed_line(line) {
                ready.push(payload);
            }
        }
        ready
    }

    /// Flush whatever event was still being assembled when the body ended.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let rest = self.buffer.split();
            if let Ok(line) = std::str::from_utf8(&rest) {
                let line = line.trim_end_matches(['\r', '\n']);
                if let Some(payload) = self.feed_line(line) {
                    return Some(payload);
                }
            }
        }
        self.dispatch()
    }

    fn feed_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_owned());
        } else {
            tracing::trace!(field, "sse: ignoring field");
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        let trimmed = payload.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    }
}

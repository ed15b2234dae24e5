//! Line framing over a chunked byte stream.

/// Splits byte chunks into complete text lines.
///
/// The buffer holds raw bytes for at most one partial line. A line is decoded
/// only after its `\n` arrives, and `\n` never appears inside a multi-byte
/// UTF-8 sequence, so characters split across chunk boundaries are rebuilt
/// intact. Invalid UTF-8 inside a complete line is replaced lossily.
#[derive(Debug, Default)]
pub struct FrameReader {
    partial: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|byte| *byte == b'\n') {
            let (head, tail) = rest.split_at(pos);
            let line = if self.partial.is_empty() {
                decode_line(head)
            } else {
                self.partial.extend_from_slice(head);
                let line = decode_line(&self.partial);
                self.partial.clear();
                line
            };
            lines.push(line);
            rest = &tail[1..];
        }
        self.partial.extend_from_slice(rest);
        lines
    }

    /// Number of buffered bytes that do not yet form a complete line.
    pub fn pending_len(&self) -> usize {
        self.partial.len()
    }

    /// Ends the stream, discarding any unterminated fragment.
    ///
    /// Returns how many bytes were dropped. Producers always finish with a
    /// line break, so a non-zero result means the stream was cut mid-line.
    pub fn finish(&mut self) -> usize {
        let dropped = self.partial.len();
        self.partial.clear();
        dropped
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

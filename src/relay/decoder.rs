//! Chunk-to-line decoding
//!
//! Bytes are held until a `\n` arrives, so a line (or a multi-byte
//! character) split across chunks comes out whole. Lines are never
//! reordered. Lines over the length limit are dropped.

use super::error::RelayError;

/// Longest upstream line kept by default
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental line splitter for an upstream byte stream
#[derive(Debug)]
pub struct LineDecoder {
    pending: Vec<u8>,
    max_line_len: usize,
    /// Inside an oversized line; bytes are dropped until its `\n`
    overflowed: bool,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}

impl LineDecoder {
    pub fn new(max_line_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line_len,
            overflowed: false,
        }
    }

    /// Feed one chunk, returning every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(newline) = rest.iter().position(|&b| b == b'\n') {
            self.append(&rest[..newline]);
            lines.extend(self.take_line());
            rest = &rest[newline + 1..];
        }
        self.append(rest);

        lines
    }

    /// Flush the unterminated tail at end of stream
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            self.overflowed = false;
            return None;
        }
        self.take_line()
    }

    fn append(&mut self, bytes: &[u8]) {
        if self.overflowed || bytes.is_empty() {
            return;
        }
        if self.pending.len() + bytes.len() > self.max_line_len {
            let err = RelayError::malformed_line(format!(
                "Upstream line longer than {} bytes",
                self.max_line_len
            ));
            tracing::warn!(error = %err, kind = ?err.kind, "Dropping upstream line");
            self.pending = Vec::new();
            self.overflowed = true;
            return;
        }
        self.pending.extend_from_slice(bytes);
    }

    fn take_line(&mut self) -> Option<String> {
        if std::mem::take(&mut self.overflowed) {
            return None;
        }
        let line = decode_line(&self.pending);
        self.pending.clear();
        Some(line)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

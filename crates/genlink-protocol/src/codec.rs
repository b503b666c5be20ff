use bytes::BytesMut;
use serde_json::{Map, Value};

use crate::envelope::Envelope;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Encode a request frame as one complete line.
///
/// Deterministic for a given `(id, method, params)`; the returned string
/// ends with a single `\n` terminator and contains no embedded newlines
/// (JSON string escaping guarantees this). No side effects.
pub fn encode_request(id: u64, method: &str, params: Option<&Value>) -> String {
    let mut obj = Map::new();
    obj.insert("jsonrpc".to_string(), Value::from("2.0"));
    obj.insert("id".to_string(), Value::from(id));
    obj.insert("method".to_string(), Value::from(method));
    if let Some(params) = params {
        obj.insert("params".to_string(), params.clone());
    }
    let mut line = Value::Object(obj).to_string();
    line.push('\n');
    line
}

/// Decode and classify one line.
///
/// Returns `None` for malformed or non-protocol input — the counterparty
/// is a trusted-but-imperfect worker, and one garbled line must not abort
/// the channel.
pub fn decode_line(line: &str) -> Option<Envelope> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!(error = %err, "discarding unparseable line");
            return None;
        }
    };
    Envelope::classify(value)
}

/// Accumulates inbound bytes and yields complete lines.
///
/// A single OS read may contain zero, one, or many complete lines; the
/// partial final line is retained for the next read.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Append a chunk of inbound bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extract the next complete line, with the `\n` terminator (and a
    /// trailing `\r`, if any) stripped. Returns `None` until a full line
    /// is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let line = self.buf.split_to(pos + 1);
        let mut end = line.len() - 1;
        if end > 0 && line[end - 1] == b'\r' {
            end -= 1;
        }
        Some(String::from_utf8_lossy(&line[..end]).into_owned())
    }

    /// Number of buffered bytes not yet forming a complete line.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Drop any buffered partial line (used when the byte stream restarts).
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

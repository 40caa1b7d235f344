//! Incremental decoder for newline-delimited JSON stream records.
//!
//! The backend transport delivers arbitrary byte chunks; each may hold zero
//! or more `\n`-terminated JSON records, and a record may straddle a chunk
//! boundary. The decoder carries the unterminated tail over to the next
//! chunk. A complete line that still fails to parse is skipped silently:
//! a lossy record is not a fatal stream condition.

use serde_json::Value;
use tracing::{debug, warn};

/// Field carrying the incremental text fragment in each record.
pub const FRAGMENT_FIELD: &str = "response";

/// Stateful NDJSON fragment decoder.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buf: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk, returning the fragments it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let Some(last_newline) = self.buf.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let tail = self.buf.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buf, tail);
        complete
            .split(|b| *b == b'\n')
            .filter_map(decode_line)
            .collect()
    }

    /// Flush a final record that arrived without a trailing newline.
    pub fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buf);
        decode_line(&rest).into_iter().collect()
    }
}

fn decode_line(line: &[u8]) -> Option<String> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    let record: Value = match serde_json::from_slice(line) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "skipping malformed stream record");
            return None;
        }
    };
    if let Some(err) = record.get("error").and_then(Value::as_str) {
        warn!(error = err, "backend reported an error mid-stream");
    }
    record
        .get(FRAGMENT_FIELD)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

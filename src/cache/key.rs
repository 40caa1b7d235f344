//! Content-addressed cache keys.
//!
//! Request content is canonicalized (object keys sorted at every depth,
//! no insignificant whitespace) and hashed with SHA-256. Logically equal
//! requests map to the same key regardless of field order, and the key is
//! stable across processes so it can be persisted in snapshots.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize `value` deterministically with object keys sorted.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Compute the 64-hex-char SHA-256 cache key of `content`.
pub fn cache_key(content: &Value) -> String {
    let digest = Sha256::digest(canonical_json(content).as_bytes());
    format!("{digest:x}")
}

/// SHA-256 of raw bytes as lowercase hex; used to key binary attachments.
pub fn digest_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

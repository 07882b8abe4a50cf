//! Deterministic content hashing.
//!
//! Values are rendered to a canonical JSON string (object keys sorted,
//! no whitespace) and hashed with SHA-256, so two values that differ only
//! in construction order hash identically.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Render `value` as canonical JSON with object keys in sorted order.
pub fn stable_stringify(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Lowercase hex SHA-256 of the canonical form of `value`.
pub fn content_hash(value: &Value) -> String {
    Sha256::digest(stable_stringify(value).as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Scalars and keys use serde_json's own escaping.
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_value(out, item);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

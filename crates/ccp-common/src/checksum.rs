//! Content fingerprints for fetched records
//!
//! A fingerprint is the MD5 hex digest of a record's canonical JSON text. The
//! canonical form sorts object keys recursively, separates items with `", "` and
//! keys from values with `": "`, and escapes every character outside printable
//! ASCII as `\uXXXX`. Two fetches of the same record therefore hash identically
//! no matter how the server ordered the keys.

use serde_json::Value;
use std::fmt::Write;

/// Compute MD5 checksum of bytes
pub fn compute_md5(data: &[u8]) -> String {
    let digest = md5::compute(data);
    format!("{:x}", digest)
}

/// Fingerprint a JSON value by hashing its canonical encoding
pub fn content_md5(value: &Value) -> String {
    compute_md5(canonical_json(value).as_bytes())
}

/// Render a JSON value in canonical form
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(&mut out, value);
    out
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_escaped(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_canonical(out, item);
            }
            out.push(']');
        },
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_escaped(out, key);
                out.push_str(": ");
                if let Some(item) = map.get(key) {
                    write_canonical(out, item);
                }
            }
            out.push('}');
        },
    }
}

fn write_escaped(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if !(' '..='~').contains(&c) => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    // Writing to a String cannot fail.
                    let _ = write!(out, "\\u{:04x}", unit);
                }
            },
            c => out.push(c),
        }
    }
    out.push('"');
}

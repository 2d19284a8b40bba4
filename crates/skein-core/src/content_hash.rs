//! Content hashing for issues.
//!
//! The hash is a sha-256 over the canonical JSON rendering of the mirror
//! record: object keys sorted recursively, `updated_at` removed. Touching
//! `updated_at` alone therefore leaves the hash unchanged, which is what
//! lets the exporter skip timestamp-only dirty records.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::issue::Issue;
use crate::mirror::MirrorRecord;

/// Computes the stable content hash of an issue (hex sha-256).
pub fn compute_content_hash(issue: &Issue) -> String {
    let record = MirrorRecord::from(issue);
    let mut value = serde_json::to_value(&record).expect("mirror record is always valid JSON");
    if let Value::Object(ref mut map) = value {
        map.remove("updated_at");
    }
    let canonical = canonical_json(&value);
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{digest:x}")
}

/// Renders a JSON value with recursively sorted object keys.
///
/// `serde_json::Map` preserves insertion order, so plain `to_string` is not
/// stable across representations that agree on content.
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
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string key"));
                out.push(':');
                write_canonical(&map[*key], out);
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
        scalar => {
            out.push_str(&serde_json::to_string(scalar).expect("scalar"));
        }
    }
}

//! Identifier grammar and hash-based id generation.
//!
//! Wire grammar: `{prefix}-{suffix}[.{child}]...` where `prefix` matches
//! `[A-Za-z0-9_-]+`, `suffix` is 3-8 lower-case base-36 characters (or a
//! decimal counter in sequential mode), and each `child` segment is a
//! positive integer.

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use num_traits::Zero;
use sha2::{Digest, Sha256};

/// Base-36 alphabet (0-9, a-z).
const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Shortest / longest hash suffix the grammar admits.
pub const MIN_HASH_LEN: usize = 3;
pub const MAX_HASH_LEN: usize = 8;

/// Collision resamples before the suffix is widened by one character.
pub const MAX_NONCE_ATTEMPTS: u32 = 8;

/// Encodes bytes as a base-36 string of exactly `length` characters.
pub fn encode_base36(data: &[u8], length: usize) -> String {
    let mut num = BigUint::from_bytes_be(data);
    let base = BigUint::from(36u32);
    let zero = BigUint::zero();

    let mut chars: Vec<u8> = Vec::with_capacity(length);
    while num > zero {
        let rem = &num % &base;
        num /= &base;
        let digits = rem.to_u32_digits();
        let i = if digits.is_empty() { 0 } else { digits[0] as usize };
        chars.push(BASE36_ALPHABET[i]);
    }
    chars.reverse();

    let mut s = String::from_utf8(chars).expect("base36 chars are valid UTF-8");
    if s.len() < length {
        s = "0".repeat(length - s.len()) + &s;
    }
    if s.len() > length {
        // Keep the least significant digits.
        s = s[s.len() - length..].to_owned();
    }
    s
}

/// Derives a hash suffix from an issue's identity inputs: title, creation
/// instant, project salt and a resample nonce.
pub fn hash_suffix(
    title: &str,
    created_at: DateTime<Utc>,
    salt: &str,
    nonce: u32,
    length: usize,
) -> String {
    let content = format!(
        "{}|{}|{}|{}",
        title,
        created_at.timestamp_nanos_opt().unwrap_or(0),
        salt,
        nonce
    );
    let hash = Sha256::digest(content.as_bytes());

    // Bytes consumed scale with the requested output width.
    let num_bytes = match length {
        3 => 2,
        4 => 3,
        5 | 6 => 4,
        7 | 8 => 5,
        _ => 2,
    };
    encode_base36(&hash[..num_bytes], length)
}

/// Formats a full hash id `{prefix}-{suffix}`.
pub fn hash_id(
    prefix: &str,
    title: &str,
    created_at: DateTime<Utc>,
    salt: &str,
    nonce: u32,
    length: usize,
) -> String {
    format!(
        "{prefix}-{}",
        hash_suffix(title, created_at, salt, nonce, length)
    )
}

/// Formats a sequential id `{prefix}-{n}`.
pub fn sequential_id(prefix: &str, n: i64) -> String {
    format!("{prefix}-{n}")
}

/// Formats the `n`-th child of `parent`.
pub fn child_id(parent: &str, n: u32) -> String {
    format!("{parent}.{n}")
}

/// Returns the parent id of a child id, or `None` at the top level.
pub fn parent_of(id: &str) -> Option<&str> {
    let (head, tail) = id.rsplit_once('.')?;
    if tail.chars().all(|c| c.is_ascii_digit()) && !tail.is_empty() {
        Some(head)
    } else {
        None
    }
}

/// A parsed identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedId<'a> {
    pub prefix: &'a str,
    pub suffix: &'a str,
    /// Child path segments, outermost first.
    pub children: Vec<u32>,
}

/// Parses an id against the wire grammar. Returns `None` on any violation.
pub fn parse_id(id: &str) -> Option<ParsedId<'_>> {
    let (prefix, rest) = id.rsplit_once('-').and_then(|(p, r)| {
        // The prefix may itself contain '-'; split at the last '-' whose
        // right side starts the suffix.
        if p.is_empty() { None } else { Some((p, r)) }
    })?;

    if !prefix
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return None;
    }

    let mut segments = rest.split('.');
    let suffix = segments.next()?;
    if suffix.is_empty()
        || !suffix
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    {
        return None;
    }

    let mut children = Vec::new();
    for seg in segments {
        let n: u32 = seg.parse().ok()?;
        if n == 0 {
            return None;
        }
        children.push(n);
    }

    Some(ParsedId {
        prefix,
        suffix,
        children,
    })
}

/// Whether `id` carries the configured project prefix.
pub fn has_prefix(id: &str, prefix: &str) -> bool {
    parse_id(id).is_some_and(|p| p.prefix == prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_base36_pads_and_truncates() {
        assert_eq!(encode_base36(&[], 4), "0000");
        assert_eq!(encode_base36(&[0xFF, 0xFF], 4).len(), 4);
        assert_eq!(encode_base36(&[0xFF, 0xFF, 0xFF, 0xFF], 3).len(), 3);
    }

    #[test]
    fn hash_id_shape() {
        let ts = Utc::now();
        let id = hash_id("sk", "Fix the sync race", ts, "salt", 0, 5);
        assert!(id.starts_with("sk-"));
        assert_eq!(id.len(), "sk-".len() + 5);
        assert!(parse_id(&id).is_some());
    }

    #[test]
    fn hash_id_deterministic_and_nonce_sensitive() {
        let ts = DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let a = hash_id("sk", "Title", ts, "salt", 0, 5);
        let b = hash_id("sk", "Title", ts, "salt", 0, 5);
        let c = hash_id("sk", "Title", ts, "salt", 1, 5);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn parse_plain_id() {
        let p = parse_id("sk-9f2ab").unwrap();
        assert_eq!(p.prefix, "sk");
        assert_eq!(p.suffix, "9f2ab");
        assert!(p.children.is_empty());
    }

    #[test]
    fn parse_child_chain() {
        let p = parse_id("sk-9f2.1.3").unwrap();
        assert_eq!(p.suffix, "9f2");
        assert_eq!(p.children, vec![1, 3]);
    }

    #[test]
    fn parse_prefix_with_dash() {
        let p = parse_id("my-proj-abc").unwrap();
        assert_eq!(p.prefix, "my-proj");
        assert_eq!(p.suffix, "abc");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_id("noprefix").is_none());
        assert!(parse_id("sk-ABC").is_none()); // upper-case suffix
        assert!(parse_id("sk-9f2.0").is_none()); // zero child
        assert!(parse_id("sk-9f2.x").is_none());
        assert!(parse_id("-abc").is_none());
    }

    #[test]
    fn child_and_parent() {
        assert_eq!(child_id("sk-9f2", 1), "sk-9f2.1");
        assert_eq!(parent_of("sk-9f2.1"), Some("sk-9f2"));
        assert_eq!(parent_of("sk-9f2.1.2"), Some("sk-9f2.1"));
        assert_eq!(parent_of("sk-9f2"), None);
    }

    #[test]
    fn has_prefix_checks_exact_prefix() {
        assert!(has_prefix("sk-abc", "sk"));
        assert!(!has_prefix("sk-abc", "other"));
        assert!(!has_prefix("sky-abc", "sk"));
    }

    #[test]
    fn sequential_format() {
        assert_eq!(sequential_id("sk", 12), "sk-12");
    }
}

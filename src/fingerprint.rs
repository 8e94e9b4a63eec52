//! Prompt fingerprinting (spec §3: "stable hash of (normalized prompt text,
//! persona tag, relevant context flags). Used as cache key.")
//!
//! Grounded on the teacher's `agent::cache::LLMCache`, which already hashes
//! prompt + system text with `Sha256` for its response cache key.

use sha2::{Digest, Sha256};

/// Stable, order-sensitive fingerprint over an arbitrary set of key/value
/// fields. Each field is length-prefixed before hashing so that
/// `fingerprint(&[("a", "bc")])` and `fingerprint(&[("ab", "c")])` never
/// collide.
pub fn fingerprint(fields: &[(&str, &str)]) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in fields {
        hasher.update((key.len() as u64).to_le_bytes());
        hasher.update(key.as_bytes());
        hasher.update((value.len() as u64).to_le_bytes());
        hasher.update(value.as_bytes());
    }
    hex_encode(&hasher.finalize())
}

/// Normalizes prompt text the same way across callers: trims, collapses
/// internal whitespace runs, and lowercases. Normalization happens before
/// fingerprinting so that cosmetic differences (trailing newline, double
/// space) do not fragment the cache.
pub fn normalize_prompt(prompt: &str) -> String {
    let mut normalized = String::with_capacity(prompt.len());
    let mut last_was_space = false;
    for ch in prompt.trim().chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                normalized.push(' ');
            }
            last_was_space = true;
        } else {
            normalized.extend(ch.to_lowercase());
            last_was_space = false;
        }
    }
    normalized
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Fingerprint for the result cache: (prompt, persona).
pub fn result_fingerprint(prompt: &str, persona: &str) -> String {
    fingerprint(&[("prompt", &normalize_prompt(prompt)), ("persona", persona)])
}

/// Fingerprint for the routing-decision cache: (prompt, context_type, complexity_level).
pub fn routing_fingerprint(prompt: &str, context_type: &str, complexity_level: &str) -> String {
    fingerprint(&[
        ("prompt", &normalize_prompt(prompt)),
        ("context_type", context_type),
        ("complexity_level", complexity_level),
    ])
}

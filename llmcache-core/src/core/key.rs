//! Deterministic cache keys.

use sha2::{Digest, Sha256};

/// Collapse runs of whitespace and trim, so formatting-only differences
/// in a prompt map to the same key
pub fn normalize_prompt(prompt: &str) -> String {
    prompt.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 of the normalized prompt, hex encoded
pub fn prompt_hash(prompt: &str) -> String {
    hex::encode(Sha256::digest(normalize_prompt(prompt).as_bytes()))
}

/// Build the cache key for a `(model, prompt)` pair.
///
/// Length-prefixed so that `("a|b", "c")` and `("a", "b|c")` never collide.
pub fn generate_cache_key(model: &str, prompt: &str) -> String {
    hash_parts(&[model, &normalize_prompt(prompt)])
}

/// SHA-256 over each part preceded by its byte length, hex encoded
pub fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

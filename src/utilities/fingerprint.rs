//! Content fingerprinting for analysis-cache keys.
//!
//! The fingerprint is a SHA-256 over normalized text plus the context
//! version, so two requests share a cache entry only when both the text and
//! the symbolic context they would be analyzed under match exactly.

use sha2::{Digest, Sha256};

/// Normalize text before hashing: lowercase, whitespace collapsed to single
/// spaces, trimmed. Punctuation is kept — "i'm fine." and "i'm fine" carry
/// different weight in this domain.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Stable fingerprint of `(normalized text, context_version)`.
pub fn fingerprint(text: &str, context_version: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(text).as_bytes());
    hasher.update(b"\x00");
    hasher.update(context_version.as_bytes());
    hex::encode(hasher.finalize())
}

//! Stable identifiers for chunks, runs, and conversations (C1).
//!
//! IDs fall into two families: content-addressed fingerprints (stable across
//! re-ingest of the same bytes, used for chunk dedup) and process-assigned
//! UUIDs (used for anything that must be unique per creation, never reused).

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Generates a fresh monotonic-enough unique id for a new run/response/conversation.
///
/// Backed by UUIDv4; uniqueness is probabilistic but the collision space is
/// large enough that this crate treats it as an invariant.
#[must_use]
pub fn new_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Computes a short, stable fingerprint for a chunk's content.
///
/// Two chunks with identical `(file_id, chunk_index, content)` always produce
/// the same `chunk_id`, which is what makes re-ingest idempotent: indexing the
/// same file twice overwrites the same chunk rows instead of accumulating
/// duplicates.
#[must_use]
pub fn chunk_fingerprint(file_id: &str, chunk_index: usize, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(chunk_index.to_le_bytes());
    hasher.update(b"\0");
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    // First 16 bytes (32 hex chars) is ample collision resistance for a
    // per-vector-store chunk id while keeping the id short in logs/payloads.
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Computes a stable dedup key for a search result, per §4.5's merge rule.
///
/// Prefers `chunk_id`, falls back to `chunk_index`, falls back to a content
/// hash so that providers that expose neither attribute still dedup sanely.
#[must_use]
pub fn dedup_key(file_id: &str, chunk_id: Option<&str>, chunk_index: Option<usize>, content: &str) -> String {
    if let Some(id) = chunk_id {
        return format!("{file_id}-{id}");
    }
    if let Some(idx) = chunk_index {
        return format!("{file_id}-{idx}");
    }
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    let hash: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("{file_id}-{hash}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable() {
        let a = chunk_fingerprint("f1", 0, "hello");
        let b = chunk_fingerprint("f1", 0, "hello");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_by_index() {
        let a = chunk_fingerprint("f1", 0, "hello");
        let b = chunk_fingerprint("f1", 1, "hello");
        assert_ne!(a, b);
    }

    #[test]
    fn dedup_key_prefers_chunk_id() {
        let k = dedup_key("f1", Some("c1"), Some(5), "text");
        assert_eq!(k, "f1-c1");
    }

    #[test]
    fn dedup_key_falls_back_to_index() {
        let k = dedup_key("f1", None, Some(5), "text");
        assert_eq!(k, "f1-5");
    }

    #[test]
    fn dedup_key_falls_back_to_content_hash() {
        let a = dedup_key("f1", None, None, "alpha");
        let b = dedup_key("f1", None, None, "beta");
        assert_ne!(a, b);
    }

    #[test]
    fn new_uuid_is_unique() {
        let a = new_uuid();
        let b = new_uuid();
        assert_ne!(a, b);
    }
}

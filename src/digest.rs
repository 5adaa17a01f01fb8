//! Content digests for analyzed sources.
//!
//! Responses and logs identify a source text by a short SHA-256 digest so
//! repeated requests against the same input are recognizable without
//! persisting any state.

use sha2::{Digest, Sha256};

/// Digest a source text into a stable identifier like `src_9f86d081884c7d65`.
pub fn source_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = hasher.finalize();
    format!("src_{}", hex::encode(&hash[..8]))
}

//! Content-addressed checksums for rule change payloads.
//!
//! A checksum is computed when a proposal is evaluated and must be presented
//! unchanged at commit time. Committing a payload whose recomputed checksum
//! differs from the evaluated one is rejected, which protects the rule set
//! against commits built on a stale evaluation.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::types::Result;

/// Compute the SHA256 hash of raw content.
pub fn compute_checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Compute the checksum of any serializable value.
///
/// The value is serialized to canonical JSON (struct fields in declaration
/// order) before hashing, so equal values always produce equal checksums.
pub fn checksum_of<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_string(value)?;
    Ok(compute_checksum(json.as_bytes()))
}

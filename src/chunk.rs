use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const UNKNOWN: &str = "unknown";

/// A contiguous text fragment of one source file with provenance metadata and
/// a stable ID (spec §3). Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub content: String,
    pub source_path: String,
    pub tech: String,
    pub component: String,
    pub version: String,
    pub topic: String,
    pub file_type: String,
    pub chunk_index: u32,
    pub start_line: u32,
    pub end_line: u32,
    /// File mtime at ingestion, as a Unix timestamp (seconds).
    pub timestamp: i64,
    /// SHA-256 of the full source file at ingestion (hex), shared by every
    /// chunk of that file (invariant I2).
    pub file_checksum: String,
}

/// Derive the stable `chunk_id` (spec §3): `hash(path_prefix || chunk_index ||
/// start_line || end_line || content)`. Round-trips across process restarts
/// for identical content (property P2).
pub fn derive_chunk_id(
    source_path: &str,
    chunk_index: u32,
    start_line: u32,
    end_line: u32,
    content: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_path.as_bytes());
    hasher.update(b"\0");
    hasher.update(chunk_index.to_le_bytes());
    hasher.update(b"\0");
    hasher.update(start_line.to_le_bytes());
    hasher.update(b"\0");
    hasher.update(end_line.to_le_bytes());
    hasher.update(b"\0");
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Derive the 64-bit integer key used as the vector store's point id
/// (invariant I4): the high 8 bytes of `SHA-256(chunk_id)`, with the sign bit
/// cleared so it fits a signed 63-bit integer (spec §6, "Point id is a signed
/// 63-bit integer derived from the chunk id").
pub fn derive_vector_point_id(chunk_id: &str) -> i64 {
    let digest = Sha256::digest(chunk_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[0..8]);
    let raw = u64::from_be_bytes(bytes);
    (raw & 0x7FFF_FFFF_FFFF_FFFF) as i64
}

/// SHA-256 hex digest of raw file bytes (spec §3, `file_checksum`).
pub fn file_checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_deterministic_across_calls() {
        let a = derive_chunk_id("docs/a.md", 0, 0, 5, "hello world");
        let b = derive_chunk_id("docs/a.md", 0, 0, 5, "hello world");
        assert_eq!(a, b, "same inputs must round-trip to the same chunk_id (P2)");
    }

    #[test]
    fn chunk_id_differs_when_content_differs() {
        let a = derive_chunk_id("docs/a.md", 0, 0, 5, "hello world");
        let b = derive_chunk_id("docs/a.md", 0, 0, 5, "goodbye world");
        assert_ne!(a, b);
    }

    #[test]
    fn vector_point_id_sign_bit_is_always_clear() {
        for seed in ["x", "y", "a much longer chunk id string", ""] {
            let id = derive_vector_point_id(seed);
            assert!(id >= 0, "point id must fit a signed 63-bit integer: {id}");
        }
    }
}

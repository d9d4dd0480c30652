use std::collections::HashMap;
use std::path::Path;

use crate::chunk::DocumentChunk;
use crate::error::{EngineError, Result};

const CACHE_FILE: &str = "chunks_metadata.bin";

/// Bumped whenever the on-disk encoding changes. Open Question (spec §9):
/// we choose a versioned, length-prefixed `bincode` blob and fail closed
/// (start empty) on a version mismatch, rather than guess at an
/// implementation-defined legacy format.
const CACHE_FORMAT_VERSION: u32 = 1;

/// In-memory `chunk_id -> DocumentChunk` map (spec §4.6): the authoritative
/// source for result content, boost inputs, and tech-scoped enumeration.
/// Persisted as one blob via temp-file + rename.
#[derive(Default)]
pub struct MetadataCache {
    entries: HashMap<String, DocumentChunk>,
}

impl MetadataCache {
    pub fn load(index_dir: &Path) -> Self {
        let path = index_dir.join(CACHE_FILE);
        match Self::try_load(&path) {
            Ok(cache) => cache,
            Err(_) => Self::default(),
        }
    }

    fn try_load(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        if bytes.len() < 12 {
            return Ok(Self::default());
        }
        let version = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if version != CACHE_FORMAT_VERSION {
            return Ok(Self::default());
        }
        let len = u64::from_le_bytes(bytes[4..12].try_into().unwrap()) as usize;
        let payload = bytes.get(12..12 + len).unwrap_or(&[]);
        let entries: HashMap<String, DocumentChunk> = bincode::deserialize(payload).unwrap_or_default();
        Ok(Self { entries })
    }

    pub fn get(&self, chunk_id: &str) -> Option<&DocumentChunk> {
        self.entries.get(chunk_id)
    }

    pub fn insert(&mut self, chunk: DocumentChunk) {
        self.entries.insert(chunk.chunk_id.clone(), chunk);
    }

    pub fn remove(&mut self, chunk_id: &str) -> Option<DocumentChunk> {
        self.entries.remove(chunk_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn chunk_ids_for_source(&self, rel_path: &str) -> Vec<String> {
        self.entries
            .values()
            .filter(|c| c.source_path == rel_path)
            .map(|c| c.chunk_id.clone())
            .collect()
    }

    pub fn chunk_ids_for_tech(&self, tech: &str) -> Vec<String> {
        self.entries
            .values()
            .filter(|c| c.tech == tech)
            .map(|c| c.chunk_id.clone())
            .collect()
    }

    pub fn sources(&self) -> Vec<String> {
        let mut set: Vec<String> = self
            .entries
            .values()
            .map(|c| c.source_path.clone())
            .collect();
        set.sort();
        set.dedup();
        set
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn persist(&self, index_dir: &Path) -> Result<()> {
        crate::writer::ensure_dir_with_space_guard(index_dir)?;
        let payload = bincode::serialize(&self.entries)
            .map_err(|e| EngineError::PersistentStore(format!("metadata cache encode failed: {e}")))?;

        let mut bytes = Vec::with_capacity(12 + payload.len());
        bytes.extend_from_slice(&CACHE_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&payload);

        crate::change_tracker::atomic_write(&index_dir.join(CACHE_FILE), &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk(id: &str, tech: &str, source: &str) -> DocumentChunk {
        DocumentChunk {
            chunk_id: id.to_string(),
            content: "hello".to_string(),
            source_path: source.to_string(),
            tech: tech.to_string(),
            component: "unknown".to_string(),
            version: "unknown".to_string(),
            topic: "Hello".to_string(),
            file_type: ".md".to_string(),
            chunk_index: 0,
            start_line: 0,
            end_line: 1,
            timestamp: 0,
            file_checksum: "deadbeef".to_string(),
        }
    }

    #[test]
    fn missing_file_starts_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cache = MetadataCache::load(tmp.path());
        assert!(cache.is_empty());
    }

    #[test]
    fn persist_and_reload_round_trips() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path()).unwrap();
        let mut cache = MetadataCache::default();
        cache.insert(sample_chunk("c1", "django", "a.md"));
        cache.persist(tmp.path()).unwrap();

        let reloaded = MetadataCache::load(tmp.path());
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("c1").unwrap().tech, "django");
    }

    #[test]
    fn version_mismatch_fails_closed() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path()).unwrap();
        let path = tmp.path().join(CACHE_FILE);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&999u32.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let cache = MetadataCache::load(tmp.path());
        assert!(cache.is_empty(), "unknown format version must start empty, not panic");
    }

    #[test]
    fn chunk_ids_for_tech_filters_correctly() {
        let mut cache = MetadataCache::default();
        cache.insert(sample_chunk("c1", "django", "a.md"));
        cache.insert(sample_chunk("c2", "drf", "b.md"));
        assert_eq!(cache.chunk_ids_for_tech("django"), vec!["c1".to_string()]);
    }
}

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::chunk::file_checksum;
use crate::error::Result;

const CHECKSUMS_FILE: &str = "file_checksums.json";

/// Persistent `source_path -> sha256_hex` map (spec §4.3). Flushed at least
/// every 10 files during a reindex and once at the end; writes are
/// temp-file + rename so a crash mid-write never corrupts the prior version.
pub struct ChangeTracker {
    path: PathBuf,
    entries: HashMap<String, String>,
    dirty_since_flush: usize,
}

impl ChangeTracker {
    pub fn load(index_dir: &Path) -> Self {
        let path = index_dir.join(CHECKSUMS_FILE);
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Self {
            path,
            entries,
            dirty_since_flush: 0,
        }
    }

    /// True if `rel_path` is new, unreadable, or its current checksum differs
    /// from the stored one.
    pub fn has_changed(&self, rel_path: &str, bytes: &[u8]) -> bool {
        match self.entries.get(rel_path) {
            Some(stored) => stored != &file_checksum(bytes),
            None => true,
        }
    }

    pub fn record(&mut self, rel_path: &str, bytes: &[u8]) {
        self.entries.insert(rel_path.to_string(), file_checksum(bytes));
        self.dirty_since_flush += 1;
    }

    pub fn remove(&mut self, rel_path: &str) {
        if self.entries.remove(rel_path).is_some() {
            self.dirty_since_flush += 1;
        }
    }

    /// Flush to disk if at least 10 entries have changed since the last
    /// flush (spec §4.3); always returns cleanly if there's nothing to do.
    pub fn maybe_flush(&mut self, index_dir: &Path) -> Result<()> {
        if self.dirty_since_flush >= 10 {
            self.flush(index_dir)?;
        }
        Ok(())
    }

    pub fn flush(&mut self, index_dir: &Path) -> Result<()> {
        crate::writer::ensure_dir_with_space_guard(index_dir)?;
        let json = serde_json::to_string_pretty(&self.entries).map_err(std::io::Error::from)?;
        atomic_write(&self.path, json.as_bytes())?;
        self.dirty_since_flush = 0;
        Ok(())
    }
}

pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut f = std::fs::File::create(&tmp_path)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// Hard safety ceiling: files larger than this are **always** skipped, regardless
/// of config. Protects low-RAM machines from reading a multi-megabyte generated
/// or minified file into the chunker.
pub const ABSOLUTE_MAX_FILE_BYTES: u64 = 1_000_000; // 1 MB

/// Controls workspace scanning behavior beyond the fixed base deny-list
/// (`.git`, `node_modules`, `.index`, virtual-env and cache directories).
///
/// Note: `.gitignore` is always respected by the scanner; these are additional
/// hard skips for noisy monorepo directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory *names* to skip anywhere in the tree (e.g. "generated", "tmp").
    ///
    /// These are compared against path components, not full paths.
    pub exclude_dir_names: Vec<String>,
    /// Hard cap on bytes read per file, below `ABSOLUTE_MAX_FILE_BYTES`.
    pub max_file_bytes: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_dir_names: vec![],
            // 512 KB default — enough for any real doc/source file, blocks log/generated bloat.
            max_file_bytes: 512 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory for persisted files (metadata cache blob, checksum map, query log).
    pub index_dir: PathBuf,

    /// Identifies the embedding function; `embedding_dim` must equal the
    /// vector store's configured dim.
    pub embedding_model_id: String,
    pub embedding_dim: usize,

    /// Fusion weights (spec §4.5). Must be non-negative and sum to 1 +/- 0.01.
    pub bm25_weight: f32,
    pub semantic_weight: f32,

    /// Chunker tuning (spec §4.1).
    pub chunk_size_tokens: usize,
    pub chunk_overlap_words: usize,

    pub scan: ScanConfig,

    /// Dual-Store Writer batch target `B` (spec §4.4).
    pub batch_size: usize,

    /// Per-store RPC timeouts (spec §5).
    pub keyword_store_timeout_secs: u64,
    pub vector_store_control_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from(".hybridocs"),
            embedding_model_id: "minishlab/potion-retrieval-32M".to_string(),
            embedding_dim: 384,
            // Spec §4.5's weights; the vestigial Python implementation used
            // 0.6/0.4 (see SPEC_FULL §11) but the spec's own default wins.
            bm25_weight: 0.4,
            semantic_weight: 0.6,
            chunk_size_tokens: 400,
            chunk_overlap_words: 100,
            scan: ScanConfig::default(),
            batch_size: 100,
            keyword_store_timeout_secs: 60,
            vector_store_control_timeout_secs: 5,
        }
    }
}

impl Config {
    /// Config error — fail fast at construction (spec §7).
    pub fn validate(&self) -> Result<()> {
        if self.bm25_weight < 0.0 || self.semantic_weight < 0.0 {
            return Err(EngineError::Config(
                "bm25_weight and semantic_weight must be non-negative".to_string(),
            ));
        }
        let sum = self.bm25_weight + self.semantic_weight;
        if (sum - 1.0).abs() > 0.01 {
            return Err(EngineError::Config(format!(
                "bm25_weight + semantic_weight must sum to 1 (+/- 0.01), got {sum}"
            )));
        }
        if self.embedding_dim == 0 {
            return Err(EngineError::Config("embedding_dim must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Load `.hybridocs.json` from the repo root; falls back to defaults on a
/// missing file or parse failure, matching the teacher's `load_config`.
pub fn load_config(repo_root: &Path) -> Config {
    let primary = repo_root.join(".hybridocs.json");

    let text = std::fs::read_to_string(&primary);
    let Ok(text) = text else { return Config::default() };

    serde_json::from_str::<Config>(&text).unwrap_or_else(|_e| {
        crate::debug_log!("[hybridocs] failed to parse {}: {_e}", primary.display());
        Config::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_weights_that_dont_sum_to_one() {
        let mut cfg = Config::default();
        cfg.bm25_weight = 0.9;
        cfg.semantic_weight = 0.9;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_negative_weight() {
        let mut cfg = Config::default();
        cfg.bm25_weight = -0.1;
        cfg.semantic_weight = 1.1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_config_falls_back_to_default_when_missing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cfg = load_config(tmp.path());
        assert_eq!(cfg.bm25_weight, Config::default().bm25_weight);
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use model2vec_rs::model::StaticModel;
use tokio::sync::RwLock;

use crate::change_tracker::ChangeTracker;
use crate::chunk::{derive_chunk_id, file_checksum, DocumentChunk};
use crate::chunker::chunk_content;
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::keyword_store::{Filters, InMemoryKeywordStore, KeywordStore};
use crate::metadata::extract_metadata;
use crate::metadata_cache::MetadataCache;
use crate::query_planner::{self, QueryEmbedder, SearchResult};
use crate::scanner::{scan_workspace, ScanOptions};
use crate::vector_store::{InMemoryVectorStore, VectorStore};
use crate::writer::{self, BatchEmbedder};

/// Statistics returned by `index_paths` (spec §4.4), even on partial failure.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IndexStats {
    pub files_processed: usize,
    pub files_updated: usize,
    pub chunks_removed: usize,
    pub chunks_added: usize,
    pub errors: usize,
}

/// Unifies the single-query path (`QueryEmbedder`) and the bulk-write path
/// (`BatchEmbedder`) behind one object-safe trait so `Engine` can hold either
/// the real model or a test double (spec §1 Non-goals: the embedding model
/// itself is a deterministic black box; only its shape is specified here).
pub trait Embedder: QueryEmbedder + BatchEmbedder {}
impl<T: QueryEmbedder + BatchEmbedder> Embedder for T {}

/// Wraps the black-box embedding model (spec §1 Non-goals) for both the
/// single-query path (`QueryEmbedder`) and the bulk-write path
/// (`BatchEmbedder`).
struct ModelEmbedder {
    model: StaticModel,
}

impl QueryEmbedder for ModelEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.model.encode_single(text))
    }
}

impl BatchEmbedder for ModelEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.model.encode_single(t)).collect())
    }
}

/// Mutable state touched only under the writer's exclusive permit (spec §5:
/// "Global state is limited to the writer's exclusive permit and the
/// metadata-cache pointer"). Readers take a shared permit on the same lock.
struct EngineState {
    cache: MetadataCache,
    tracker: ChangeTracker,
}

/// Top-level handle wiring the keyword store, vector store, metadata cache,
/// and change tracker together under the multi-reader/single-writer
/// concurrency model (spec §5).
pub struct Engine {
    config: Config,
    repo_root: PathBuf,
    index_dir: PathBuf,
    keyword_store: Arc<dyn KeywordStore>,
    vector_store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    state: RwLock<EngineState>,
}

impl Engine {
    /// Construct the engine, failing fast if the config is invalid or the
    /// keyword store does not respond to `ping` (spec §7: "Store
    /// unavailable...fail fast at construction").
    pub async fn open(repo_root: PathBuf, config: Config) -> Result<Self> {
        config.validate()?;

        let model = StaticModel::from_pretrained(&config.embedding_model_id, None, None, None)
            .map_err(|e| EngineError::Config(format!("failed to load embedding model: {e}")))?;

        Self::open_with(
            repo_root,
            config,
            Arc::new(InMemoryKeywordStore::new()),
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(ModelEmbedder { model }),
        )
        .await
    }

    /// Same construction path as `open`, but with the keyword store, vector
    /// store, and embedder injected rather than built from `config`. Used by
    /// integration tests to exercise the full indexing/search pipeline
    /// without a network round-trip to fetch the real embedding model; the
    /// in-memory store implementations are already the production stand-ins
    /// for the opaque external services (spec §1 Non-goals).
    pub async fn open_with(
        repo_root: PathBuf,
        config: Config,
        keyword_store: Arc<dyn KeywordStore>,
        vector_store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        config.validate()?;

        let index_dir = if config.index_dir.is_absolute() {
            config.index_dir.clone()
        } else {
            repo_root.join(&config.index_dir)
        };

        keyword_store.create_index().await?;
        vector_store.create_collection(config.embedding_dim).await?;
        keyword_store
            .ping()
            .await
            .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;

        let cache = MetadataCache::load(&index_dir);
        let tracker = ChangeTracker::load(&index_dir);

        Ok(Self {
            config,
            repo_root,
            index_dir,
            keyword_store,
            vector_store,
            embedder,
            state: RwLock::new(EngineState { cache, tracker }),
        })
    }

    /// `index_paths(paths, force)` (spec §4.4). Files are processed in
    /// arrival order; the write permit is released and reacquired between
    /// batch flushes so a long-running index never starves readers for
    /// longer than one batch (spec §5).
    pub async fn index_paths(&self, paths: &[PathBuf], force: bool) -> Result<IndexStats> {
        let mut stats = IndexStats::default();
        let mut session_chunk_ids: Vec<String> = Vec::new();
        let mut batch: Vec<DocumentChunk> = Vec::new();
        let mut batch_target = self.config.batch_size;
        let mut mem_monitor = writer::MemoryMonitor::default();
        // Checksums for files whose chunks are sitting in `batch`, not yet
        // flushed: only applied to the tracker once that batch commits, so a
        // flush failure leaves those files looking unchanged on the next run
        // (spec §4.4 P4/P5) instead of being skipped forever.
        let mut pending_tracker_entries: Vec<(String, Vec<u8>)> = Vec::new();
        // Checksums already applied to the tracker this session, kept so a
        // later flush failure (which rolls back the whole session via
        // `session_chunk_ids`) can also revert them.
        let mut session_tracker_entries: Vec<(String, Vec<u8>)> = Vec::new();

        for path in paths {
            let scan_opts = ScanOptions {
                repo_root: self.repo_root.clone(),
                target: path.clone(),
                max_file_bytes: self.config.scan.max_file_bytes.min(crate::config::ABSOLUTE_MAX_FILE_BYTES),
                exclude_dir_names: self.config.scan.exclude_dir_names.clone(),
                index_dir_name: self.config.index_dir.file_name().and_then(|s| s.to_str()).map(String::from),
            };

            let entries = match scan_workspace(&scan_opts) {
                Ok(e) => e,
                Err(_) => continue,
            };

            for entry in entries {
                let rel_path = entry.rel_path.to_string_lossy().to_string();

                let bytes = match std::fs::read(&entry.abs_path) {
                    Ok(b) => b,
                    Err(_) => {
                        stats.errors += 1;
                        continue;
                    }
                };

                let already_indexed;
                let changed;
                {
                    let state = self.state.read().await;
                    changed = force || state.tracker.has_changed(&rel_path, &bytes);
                    already_indexed = !state.cache.chunk_ids_for_source(&rel_path).is_empty();
                }

                if !changed {
                    continue;
                }

                if already_indexed {
                    let mut state = self.state.write().await;
                    let old_ids = state.cache.chunk_ids_for_source(&rel_path);
                    writer::rollback_session(
                        self.keyword_store.as_ref(),
                        self.vector_store.as_ref(),
                        &mut state.cache,
                        &old_ids,
                    )
                    .await;
                    stats.chunks_removed += old_ids.len();
                    stats.files_updated += 1;
                }

                let content = String::from_utf8_lossy(&bytes).into_owned();
                let file_type = entry
                    .abs_path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| format!(".{e}"))
                    .unwrap_or_default();

                let metadata = extract_metadata(&entry.rel_path, &content);
                let checksum = file_checksum(&bytes);
                let timestamp = std::fs::metadata(&entry.abs_path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);

                let spans = chunk_content(&content, &file_type, self.config.chunk_size_tokens);
                for (chunk_index, span) in spans.into_iter().enumerate() {
                    let chunk_id = derive_chunk_id(&rel_path, chunk_index as u32, span.start_line, span.end_line, &span.content);
                    batch.push(DocumentChunk {
                        chunk_id,
                        content: span.content,
                        source_path: rel_path.clone(),
                        tech: metadata.tech.clone(),
                        component: metadata.component.clone(),
                        version: metadata.version.clone(),
                        topic: metadata.topic.clone(),
                        file_type: file_type.clone(),
                        chunk_index: chunk_index as u32,
                        start_line: span.start_line,
                        end_line: span.end_line,
                        timestamp,
                        file_checksum: checksum.clone(),
                    });
                }

                pending_tracker_entries.push((rel_path.clone(), bytes.clone()));
                stats.files_processed += 1;

                let pressure = mem_monitor.is_under_pressure();
                if pressure {
                    batch_target = (batch_target / 2).max(1);
                } else if batch_target < self.config.batch_size {
                    batch_target = self.config.batch_size;
                }

                if batch.len() >= batch_target || pressure {
                    let taken = std::mem::take(&mut batch);
                    let mut state = self.state.write().await;
                    match writer::flush_batch(
                        self.keyword_store.as_ref(),
                        self.vector_store.as_ref(),
                        &mut state.cache,
                        self.embedder.as_ref(),
                        taken,
                    )
                    .await
                    {
                        Ok(committed) => {
                            stats.chunks_added += committed.len();
                            session_chunk_ids.extend(committed);
                            for (rel, content_bytes) in pending_tracker_entries.drain(..) {
                                state.tracker.record(&rel, &content_bytes);
                                session_tracker_entries.push((rel, content_bytes));
                            }
                            let _ = state.tracker.maybe_flush(&self.index_dir);
                        }
                        Err(e) => {
                            writer::rollback_session(
                                self.keyword_store.as_ref(),
                                self.vector_store.as_ref(),
                                &mut state.cache,
                                &session_chunk_ids,
                            )
                            .await;
                            for (rel, _) in session_tracker_entries.drain(..) {
                                state.tracker.remove(&rel);
                            }
                            pending_tracker_entries.clear();
                            let _ = state.tracker.flush(&self.index_dir);
                            return Err(e);
                        }
                    }
                    // Drop the write guard before the next file's read-lock
                    // acquisition above, so readers can interleave between
                    // batches (spec §5).
                }
            }
        }

        if !batch.is_empty() {
            let committed = writer::flush_batch(
                self.keyword_store.as_ref(),
                self.vector_store.as_ref(),
                &mut self.state.write().await.cache,
                self.embedder.as_ref(),
                std::mem::take(&mut batch),
            )
            .await;

            match committed {
                Ok(ids) => {
                    stats.chunks_added += ids.len();
                    session_chunk_ids.extend(ids);
                    let mut state = self.state.write().await;
                    for (rel, content_bytes) in pending_tracker_entries.drain(..) {
                        state.tracker.record(&rel, &content_bytes);
                        session_tracker_entries.push((rel, content_bytes));
                    }
                }
                Err(e) => {
                    let mut state = self.state.write().await;
                    writer::rollback_session(
                        self.keyword_store.as_ref(),
                        self.vector_store.as_ref(),
                        &mut state.cache,
                        &session_chunk_ids,
                    )
                    .await;
                    for (rel, _) in session_tracker_entries.drain(..) {
                        state.tracker.remove(&rel);
                    }
                    pending_tracker_entries.clear();
                    let _ = state.tracker.flush(&self.index_dir);
                    return Err(e);
                }
            }
        }

        {
            let mut state = self.state.write().await;
            let _ = state.tracker.flush(&self.index_dir);
            let _ = state.cache.persist(&self.index_dir);
        }

        Ok(stats)
    }

    /// `search(query, top_k, filters)` (spec §4.5). Takes a shared read
    /// permit on the engine state for the duration of the lookup.
    pub async fn search(&self, query: &str, top_k: usize, filters: Filters) -> Vec<SearchResult> {
        let state = self.state.read().await;
        query_planner::search(
            self.keyword_store.as_ref(),
            self.vector_store.as_ref(),
            &state.cache,
            self.embedder.as_ref(),
            &self.config,
            &self.index_dir,
            query,
            top_k,
            filters,
        )
        .await
    }

    /// `retrieve(chunk_id)` (spec §6): returns absent rather than erroring
    /// (spec §7, "Not-found").
    pub async fn retrieve(&self, chunk_id: &str) -> Option<DocumentChunk> {
        self.state.read().await.cache.get(chunk_id).cloned()
    }

    pub async fn get_stats(&self) -> (usize, usize) {
        let state = self.state.read().await;
        (
            state.cache.len(),
            self.keyword_store.count().await.unwrap_or(0),
        )
    }

    pub async fn list_sources(&self) -> Vec<String> {
        self.state.read().await.cache.sources()
    }

    pub async fn clear_tech(&self, tech: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        let removed = writer::clear_tech(self.keyword_store.as_ref(), self.vector_store.as_ref(), &mut state.cache, tech).await?;
        state.cache.persist(&self.index_dir)?;
        Ok(removed)
    }

    pub async fn clear_all(&self) -> Result<()> {
        let mut state = self.state.write().await;
        writer::clear_all(
            self.keyword_store.as_ref(),
            self.vector_store.as_ref(),
            &mut state.cache,
            self.config.embedding_dim,
        )
        .await?;
        let _ = std::fs::remove_file(self.index_dir.join("file_checksums.json"));
        let _ = std::fs::remove_file(self.index_dir.join("chunks_metadata.bin"));
        state.tracker = ChangeTracker::load(&self.index_dir);
        Ok(())
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }
}

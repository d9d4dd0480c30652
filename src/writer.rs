use std::path::Path;
use std::time::Duration;

use sysinfo::{Disks, System};

use crate::chunk::{derive_vector_point_id, DocumentChunk};
use crate::error::{EngineError, Result};
use crate::keyword_store::KeywordStore;
use crate::metadata_cache::MetadataCache;
use crate::vector_store::{VectorPayload, VectorPoint, VectorStore};

const KEYWORD_SUBBATCH: usize = 500;
const EMBED_SUBBATCH: usize = 50;
const VECTOR_SUBBATCH: usize = 100;
const MAX_ATTEMPTS: u32 = 3;
const SUBBATCH_DELAY: Duration = Duration::from_millis(100);
const MEMORY_PRESSURE_RATIO: f64 = 0.70;
const MIN_FREE_DISK_BYTES: u64 = 1024 * 1024 * 1024; // 1 GiB

/// Injects bulk (batch) embedding, distinct from the single-query embedder
/// used by the planner (spec §1 Non-goals: embedding model is a black box).
pub trait BatchEmbedder: Send + Sync {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Samples system RAM to decide whether the writer should halve its batch
/// target (spec §4.4 "Memory policy").
pub struct MemoryMonitor {
    sys: System,
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self { sys: System::new_all() }
    }
}

impl MemoryMonitor {
    pub fn is_under_pressure(&mut self) -> bool {
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        if total == 0 {
            return false;
        }
        (self.sys.used_memory() as f64 / total as f64) > MEMORY_PRESSURE_RATIO
    }
}

/// Disk-space guard (spec §4.4 "Disk-space policy"): refuses to write the
/// checksum file or metadata cache when free space is below 1 GiB. Writes
/// themselves are always temp-file + rename, so a refusal here never
/// corrupts an existing persisted file.
pub fn ensure_dir_with_space_guard(index_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(index_dir)?;

    let disks = Disks::new_with_refreshed_list();
    let free = disks
        .iter()
        .filter(|d| index_dir.starts_with(d.mount_point()))
        .map(|d| d.available_space())
        .max_by_key(|&space| space)
        .unwrap_or(u64::MAX);

    if free < MIN_FREE_DISK_BYTES {
        return Err(EngineError::DiskSpace(format!(
            "only {free} bytes free under {}, need at least {MIN_FREE_DISK_BYTES}",
            index_dir.display()
        )));
    }
    Ok(())
}

/// Flush one pending batch across both stores (spec §4.4 `_flush_batch`).
///
/// Commits a chunk to the metadata cache only once both stores have
/// accepted it. On failure after retries, issues best-effort deletes for
/// every chunk id in this batch against both stores and returns an error;
/// the caller (`Engine::index_paths`) is responsible for the session-wide
/// rollback pass over every chunk id added so far.
pub async fn flush_batch(
    keyword_store: &dyn KeywordStore,
    vector_store: &dyn VectorStore,
    cache: &mut MetadataCache,
    embedder: &dyn BatchEmbedder,
    batch: Vec<DocumentChunk>,
) -> Result<Vec<String>> {
    if batch.is_empty() {
        return Ok(vec![]);
    }

    let batch_ids: Vec<String> = batch.iter().map(|c| c.chunk_id.clone()).collect();

    if let Err(e) = insert_keyword_subbatches(keyword_store, &batch).await {
        best_effort_delete(keyword_store, vector_store, &batch_ids).await;
        return Err(e);
    }

    let embeddings = match embed_subbatches(embedder, &batch) {
        Ok(v) => v,
        Err(e) => {
            best_effort_delete(keyword_store, vector_store, &batch_ids).await;
            return Err(e);
        }
    };

    let points: Vec<VectorPoint> = batch
        .iter()
        .zip(embeddings.into_iter())
        .map(|(chunk, vector)| VectorPoint {
            id: derive_vector_point_id(&chunk.chunk_id),
            vector,
            payload: VectorPayload {
                chunk_id: chunk.chunk_id.clone(),
                tech: chunk.tech.clone(),
                component: chunk.component.clone(),
                version: chunk.version.clone(),
                file_type: chunk.file_type.clone(),
            },
        })
        .collect();

    if let Err(e) = upsert_vector_subbatches(vector_store, points).await {
        best_effort_delete(keyword_store, vector_store, &batch_ids).await;
        return Err(e);
    }

    for chunk in batch {
        cache.insert(chunk);
    }

    Ok(batch_ids)
}

async fn insert_keyword_subbatches(keyword_store: &dyn KeywordStore, batch: &[DocumentChunk]) -> Result<()> {
    for (i, sub) in batch.chunks(KEYWORD_SUBBATCH).enumerate() {
        crate::retry::with_backoff(MAX_ATTEMPTS, || keyword_store.bulk(sub, true)).await?;
        if i > 0 {
            tokio::time::sleep(SUBBATCH_DELAY).await;
        }
    }
    Ok(())
}

fn embed_subbatches(embedder: &dyn BatchEmbedder, batch: &[DocumentChunk]) -> Result<Vec<Vec<f32>>> {
    let mut embeddings = Vec::with_capacity(batch.len());
    for sub in batch.chunks(EMBED_SUBBATCH) {
        let texts: Vec<String> = sub.iter().map(|c| c.content.clone()).collect();
        embeddings.extend(embedder.embed_batch(&texts)?);
    }
    Ok(embeddings)
}

async fn upsert_vector_subbatches(vector_store: &dyn VectorStore, points: Vec<VectorPoint>) -> Result<()> {
    for (i, sub) in points.chunks(VECTOR_SUBBATCH).enumerate() {
        let owned: Vec<VectorPoint> = sub
            .iter()
            .map(|p| VectorPoint {
                id: p.id,
                vector: p.vector.clone(),
                payload: VectorPayload {
                    chunk_id: p.payload.chunk_id.clone(),
                    tech: p.payload.tech.clone(),
                    component: p.payload.component.clone(),
                    version: p.payload.version.clone(),
                    file_type: p.payload.file_type.clone(),
                },
            })
            .collect();
        crate::retry::with_backoff(MAX_ATTEMPTS, || {
            let batch = owned.clone();
            async move { vector_store.upsert(batch).await }
        })
        .await?;
        if i > 0 {
            tokio::time::sleep(SUBBATCH_DELAY).await;
        }
    }
    Ok(())
}

async fn best_effort_delete(keyword_store: &dyn KeywordStore, vector_store: &dyn VectorStore, chunk_ids: &[String]) {
    let _ = keyword_store.delete_by_id(chunk_ids).await;
    let point_ids: Vec<i64> = chunk_ids.iter().map(|id| derive_vector_point_id(id)).collect();
    let _ = vector_store.delete(&point_ids).await;
}

/// Session-wide rollback (spec §4.4, §7, P5): remove every chunk id added in
/// the current `index_paths` call from both stores and the metadata cache.
pub async fn rollback_session(
    keyword_store: &dyn KeywordStore,
    vector_store: &dyn VectorStore,
    cache: &mut MetadataCache,
    chunk_ids: &[String],
) {
    best_effort_delete(keyword_store, vector_store, chunk_ids).await;
    for id in chunk_ids {
        cache.remove(id);
    }
}

/// `clear_tech(tech)` (spec §4.4): enumerate matching entries, delete from
/// both stores and the cache in one pass, then rewrite both persisted files.
pub async fn clear_tech(
    keyword_store: &dyn KeywordStore,
    vector_store: &dyn VectorStore,
    cache: &mut MetadataCache,
    tech: &str,
) -> Result<usize> {
    let ids = cache.chunk_ids_for_tech(tech);
    best_effort_delete(keyword_store, vector_store, &ids).await;
    for id in &ids {
        cache.remove(id);
    }
    Ok(ids.len())
}

/// `clear_all()` (spec §4.4): drop and recreate the keyword index and the
/// vector collection, empty the cache, delete persisted files.
pub async fn clear_all(
    keyword_store: &dyn KeywordStore,
    vector_store: &dyn VectorStore,
    cache: &mut MetadataCache,
    embedding_dim: usize,
) -> Result<()> {
    keyword_store.create_index().await?;
    vector_store.create_collection(embedding_dim).await?;
    cache.clear();
    Ok(())
}

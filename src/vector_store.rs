use async_trait::async_trait;
use rayon::prelude::*;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::keyword_store::Filters;

/// Scalar payload carried alongside each point, sufficient for filtering and
/// result assembly without a round trip to the metadata cache (spec §6).
#[derive(Debug, Clone)]
pub struct VectorPayload {
    pub chunk_id: String,
    pub tech: String,
    pub component: String,
    pub version: String,
    pub file_type: String,
}

pub struct VectorPoint {
    pub id: i64,
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
}

/// Vector-store contract (spec §6): `create_collection`, `upsert`, `query`,
/// `delete`, `count`. Point id is a signed 63-bit integer derived from the
/// chunk id (see `chunk::derive_vector_point_id`); `component` is not a
/// strict filter here, only `tech`/`version`/`file_type` are.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn create_collection(&self, dim: usize) -> Result<()>;
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()>;
    /// Returns `(point_id, chunk_id, raw_cosine_score)` ranked descending.
    async fn query(&self, vector: &[f32], filters: &Filters, limit: usize) -> Result<Vec<(i64, String, f32)>>;
    async fn delete(&self, ids: &[i64]) -> Result<()>;
    async fn count(&self) -> Result<usize>;
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// In-process reference implementation: brute-force cosine search over an
/// in-memory point set. Stands in for the opaque external vector-search
/// service the contract describes (spec §1 Non-goals).
#[derive(Default)]
pub struct InMemoryVectorStore {
    points: RwLock<HashMap<i64, (Vec<f32>, VectorPayload)>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn payload_matches(payload: &VectorPayload, filters: &Filters) -> bool {
    filters.tech.as_ref().is_none_or(|t| &payload.tech == t)
        && filters.version.as_ref().is_none_or(|v| &payload.version == v)
        && filters.file_type.as_ref().is_none_or(|f| &payload.file_type == f)
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_collection(&self, _dim: usize) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        let mut store = self.points.write().await;
        for p in points {
            store.insert(p.id, (p.vector, p.payload));
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], filters: &Filters, limit: usize) -> Result<Vec<(i64, String, f32)>> {
        let store = self.points.read().await;
        let candidates: Vec<(&i64, &(Vec<f32>, VectorPayload))> =
            store.iter().filter(|(_, (_, p))| payload_matches(p, filters)).collect();

        let mut scored: Vec<(i64, String, f32)> = candidates
            .par_iter()
            .map(|(id, (v, p))| (**id, p.chunk_id.clone(), cosine_similarity(vector, v)))
            .collect();

        scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap().then_with(|| a.1.cmp(&b.1)));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete(&self, ids: &[i64]) -> Result<()> {
        let mut store = self.points.write().await;
        for id in ids {
            store.remove(id);
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.points.read().await.len())
    }
}

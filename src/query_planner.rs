use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use crate::chunk::DocumentChunk;
use crate::config::Config;
use crate::keyword_store::{Filters, KeywordStore};
use crate::metadata_cache::MetadataCache;
use crate::vector_store::VectorStore;

/// Injects the black-box embedding function (spec §1 Non-goals: "the
/// embedding model itself...treated as a deterministic black box").
pub trait QueryEmbedder: Send + Sync {
    fn embed(&self, text: &str) -> crate::error::Result<Vec<f32>>;
}

/// One ranked result, fully materialized from the Metadata Cache (spec §4.5
/// step 10).
#[derive(Debug, Clone)]
pub struct SearchResult {
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
    pub norm_bm25: f32,
    pub norm_sem: f32,
    pub final_score: f32,
}

/// Over-fetch multiplier table (spec §4.5 step 1).
fn overfetch_size(top_k: usize) -> usize {
    let multiplier = match top_k {
        0..=5 => 20,
        6..=10 => 15,
        11..=20 => 12,
        21..=50 => 10,
        _ => 8,
    };
    top_k.max(1) * multiplier
}

/// Min-max normalize raw scores into `[0,1]` (spec §4.5 step 5). If all
/// scores are 0, they remain 0; if min == max > 0, all become 1.
fn min_max_normalize(pairs: &[(String, f32)]) -> HashMap<String, f32> {
    let mut out = HashMap::new();
    if pairs.is_empty() {
        return out;
    }
    let min = pairs.iter().map(|(_, s)| *s).fold(f32::INFINITY, f32::min);
    let max = pairs.iter().map(|(_, s)| *s).fold(f32::NEG_INFINITY, f32::max);

    if max <= 0.0 {
        for (id, _) in pairs {
            out.insert(id.clone(), 0.0);
        }
    } else if (max - min).abs() < f32::EPSILON {
        for (id, _) in pairs {
            out.insert(id.clone(), 1.0);
        }
    } else {
        for (id, s) in pairs {
            out.insert(id.clone(), (s - min) / (max - min));
        }
    }
    out
}

fn position_boost(chunk_index: u32) -> f32 {
    match chunk_index {
        0 => 1.25,
        1 => 1.15,
        2 => 1.10,
        _ => 1.00,
    }
}

fn section_boost(source_path: &str, component: &str) -> f32 {
    let haystack = format!("{} {}", source_path.to_ascii_lowercase(), component.to_ascii_lowercase());
    if ["intro", "overview", "getting-started"].iter().any(|k| haystack.contains(k)) {
        1.30
    } else if ["topics", "guides"].iter().any(|k| haystack.contains(k)) {
        1.20
    } else if ["howto", "how-to"].iter().any(|k| haystack.contains(k)) {
        1.10
    } else if haystack.contains("ref") || component.eq_ignore_ascii_case("reference") {
        1.00
    } else {
        1.05
    }
}

/// Estimate the fraction of `content`'s lines that look like code: fenced
/// blocks, indented lines, and structured-value terminators (spec §4.5 step
/// 7, "code-density penalty").
fn code_density(content: &str) -> f32 {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return 0.0;
    }

    let mut in_fence = false;
    let mut code_lines = 0usize;
    for line in &lines {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            code_lines += 1;
            continue;
        }
        if in_fence {
            code_lines += 1;
            continue;
        }
        if line.starts_with("    ") || line.starts_with('\t') {
            code_lines += 1;
            continue;
        }
        let t = trimmed.trim_end();
        if t.ends_with('{') || t.ends_with('}') || t.ends_with(';') || t.ends_with("=>") {
            code_lines += 1;
        }
    }
    code_lines as f32 / lines.len() as f32
}

fn code_density_penalty(content: &str) -> f32 {
    if code_density(content) > 0.70 {
        0.70
    } else {
        1.00
    }
}

/// Run `search(query, top_k, filters)` (spec §4.5). Either side's failure is
/// tolerated: the fused ranking falls back to whatever the surviving side
/// produced; if both fail, the result is an empty list (spec §7, "search on
/// a broken store...full failure returns an empty list").
#[allow(clippy::too_many_arguments)]
pub async fn search(
    keyword_store: &dyn KeywordStore,
    vector_store: &dyn VectorStore,
    cache: &MetadataCache,
    embedder: &dyn QueryEmbedder,
    config: &Config,
    index_dir: &Path,
    query: &str,
    top_k: usize,
    filters: Filters,
) -> Vec<SearchResult> {
    let fetch_size = overfetch_size(top_k);

    let keyword_future = keyword_store.search(query, &filters, fetch_size);
    let vector_future = async {
        let embedding = embedder.embed(query)?;
        vector_store.query(&embedding, &filters, fetch_size).await
    };

    let (kw_result, vec_result) = tokio::join!(keyword_future, vector_future);

    let kw_pairs: Vec<(String, f32)> = kw_result.unwrap_or_else(|e| {
        crate::debug_log!("[hybridocs] keyword-store search failed, degrading to vector-only: {e}");
        vec![]
    });
    let vec_pairs: Vec<(String, f32)> = vec_result
        .unwrap_or_else(|e| {
            crate::debug_log!("[hybridocs] vector-store search failed, degrading to keyword-only: {e}");
            vec![]
        })
        .into_iter()
        .map(|(_, chunk_id, score)| (chunk_id, score))
        .collect();

    let norm_kw = min_max_normalize(&kw_pairs);
    let norm_vec = min_max_normalize(&vec_pairs);

    let mut chunk_ids: Vec<String> = kw_pairs.iter().map(|(id, _)| id.clone()).collect();
    for (id, _) in &vec_pairs {
        if !chunk_ids.contains(id) {
            chunk_ids.push(id.clone());
        }
    }

    let mut results: Vec<SearchResult> = chunk_ids
        .into_iter()
        .filter_map(|chunk_id| {
            let chunk = cache.get(&chunk_id)?;
            // The vector store does not carry `component` as a strict filter
            // (spec §4.5 step 3); post-filter vector-sourced hits here so a
            // `component` constraint holds for every returned result (P7),
            // not just the keyword-sourced ones already filtered server-side.
            if !filters.matches_component(chunk) {
                return None;
            }
            let norm_bm25 = norm_kw.get(&chunk_id).copied().unwrap_or(0.0);
            let norm_sem = norm_vec.get(&chunk_id).copied().unwrap_or(0.0);
            Some(materialize(chunk, norm_bm25, norm_sem, config))
        })
        .collect();

    results.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap()
            .then_with(|| b.norm_sem.partial_cmp(&a.norm_sem).unwrap())
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    results.truncate(top_k);

    write_query_log(index_dir, query, &filters, results.len());
    results
}

fn materialize(chunk: &DocumentChunk, norm_bm25: f32, norm_sem: f32, config: &Config) -> SearchResult {
    let base = config.bm25_weight * norm_bm25 + config.semantic_weight * norm_sem;
    let final_score =
        base * position_boost(chunk.chunk_index) * section_boost(&chunk.source_path, &chunk.component) * code_density_penalty(&chunk.content);

    SearchResult {
        chunk_id: chunk.chunk_id.clone(),
        content: chunk.content.clone(),
        source_path: chunk.source_path.clone(),
        tech: chunk.tech.clone(),
        component: chunk.component.clone(),
        version: chunk.version.clone(),
        topic: chunk.topic.clone(),
        file_type: chunk.file_type.clone(),
        chunk_index: chunk.chunk_index,
        start_line: chunk.start_line,
        end_line: chunk.end_line,
        norm_bm25,
        norm_sem,
        final_score,
    }
}

fn write_query_log(index_dir: &Path, query: &str, filters: &Filters, results: usize) {
    let line = format!(
        "{} | query='{}' | filters={{tech={:?}, component={:?}, version={:?}, file_type={:?}}} | results={}\n",
        chrono::Utc::now().to_rfc3339(),
        query,
        filters.tech,
        filters.component,
        filters.version,
        filters.file_type,
        results
    );

    if std::fs::create_dir_all(index_dir).is_err() {
        return;
    }
    if let Ok(mut f) = std::fs::OpenOptions::new().create(true).append(true).open(index_dir.join("search_queries.log")) {
        let _ = f.write_all(line.as_bytes());
    }
}

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::chunk::DocumentChunk;
use crate::error::Result;

/// Framework-specific identifiers that get an extra `^1.5` field-boost
/// multiplier when a `tech` filter selects them (SPEC_FULL §11, grounded on
/// `examples/original_source/search_engine.py:533 _boost_query_keywords`).
/// Additive on top of the `content^2 / topic^1.5 / component^1.0` field
/// weights below, not a replacement for them.
const TECH_BOOST_TERMS: &[(&str, &[&str])] = &[
    ("django", &["model", "foreignkey", "queryset", "manager", "migration"]),
    ("drf", &["serializer", "viewset", "permission", "throttle", "pagination"]),
    ("psycopg", &["connection", "cursor", "transaction", "adapt"]),
];

fn tech_boost_terms(tech: Option<&str>) -> &'static [&'static str] {
    tech.and_then(|t| TECH_BOOST_TERMS.iter().find(|(name, _)| *name == t))
        .map(|(_, terms)| *terms)
        .unwrap_or(&[])
}

/// Optional query constraints, shared by both stores (spec §4.5, §6).
/// `tech`/`version`/`file_type` are exact-equality; `component` is a
/// substring-tolerant text match.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub tech: Option<String>,
    pub component: Option<String>,
    pub version: Option<String>,
    pub file_type: Option<String>,
}

impl Filters {
    fn matches_exact(&self, chunk: &DocumentChunk) -> bool {
        self.tech.as_ref().is_none_or(|t| &chunk.tech == t)
            && self.version.as_ref().is_none_or(|v| &chunk.version == v)
            && self.file_type.as_ref().is_none_or(|f| &chunk.file_type == f)
    }

    pub(crate) fn matches_component(&self, chunk: &DocumentChunk) -> bool {
        self.component
            .as_ref()
            .is_none_or(|c| chunk.component.to_ascii_lowercase().contains(&c.to_ascii_lowercase()))
    }
}

/// Keyword-store contract (spec §6): any inverted-index engine implementing
/// `create_index`, `bulk`, `search`, `delete_by_id`, `count`, `ping`. Mapping
/// requires `chunk_id: keyword`, `content: text`, `tech|version|file_type:
/// keyword`, `component|topic: text`, `timestamp: date`.
#[async_trait]
pub trait KeywordStore: Send + Sync {
    async fn create_index(&self) -> Result<()>;
    async fn bulk(&self, chunks: &[DocumentChunk], refresh: bool) -> Result<()>;
    /// Returns `(chunk_id, raw_bm25_score)` ranked descending, size-limited.
    async fn search(&self, query: &str, filters: &Filters, size: usize) -> Result<Vec<(String, f32)>>;
    async fn delete_by_id(&self, chunk_ids: &[String]) -> Result<()>;
    async fn count(&self) -> Result<usize>;
    async fn ping(&self) -> Result<()>;
}

/// In-process reference implementation: a simple weighted multi-match score
/// (`content^2, topic^1.5, component^1.0`) over an in-memory postings map.
/// Stands in for the opaque external inverted-index service the contract
/// describes (spec §1 Non-goals: "external keyword/vector stores...only
/// consumed operations specified").
#[derive(Default)]
pub struct InMemoryKeywordStore {
    docs: RwLock<HashMap<String, DocumentChunk>>,
}

impl InMemoryKeywordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn tokenize(s: &str) -> Vec<String> {
    s.to_ascii_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn field_score(field: &str, query_tokens: &[String], weight: f32, boost_terms: &[&str]) -> f32 {
    let field_tokens = tokenize(field);
    if field_tokens.is_empty() {
        return 0.0;
    }
    query_tokens
        .iter()
        .filter(|qt| field_tokens.contains(qt))
        .map(|qt| {
            if boost_terms.iter().any(|t| t.eq_ignore_ascii_case(qt)) {
                weight * 1.5
            } else {
                weight
            }
        })
        .sum()
}

#[async_trait]
impl KeywordStore for InMemoryKeywordStore {
    async fn create_index(&self) -> Result<()> {
        Ok(())
    }

    async fn bulk(&self, chunks: &[DocumentChunk], _refresh: bool) -> Result<()> {
        let mut docs = self.docs.write().await;
        for c in chunks {
            docs.insert(c.chunk_id.clone(), c.clone());
        }
        Ok(())
    }

    async fn search(&self, query: &str, filters: &Filters, size: usize) -> Result<Vec<(String, f32)>> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Ok(vec![]);
        }

        let boost_terms = tech_boost_terms(filters.tech.as_deref());
        let docs = self.docs.read().await;
        let mut scored: Vec<(String, f32)> = docs
            .values()
            .filter(|c| filters.matches_exact(c) && filters.matches_component(c))
            .filter_map(|c| {
                let score = field_score(&c.content, &query_tokens, 2.0, boost_terms)
                    + field_score(&c.topic, &query_tokens, 1.5, boost_terms)
                    + field_score(&c.component, &query_tokens, 1.0, boost_terms);
                (score > 0.0).then(|| (c.chunk_id.clone(), score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then_with(|| a.0.cmp(&b.0)));
        scored.truncate(size);
        Ok(scored)
    }

    async fn delete_by_id(&self, chunk_ids: &[String]) -> Result<()> {
        let mut docs = self.docs.write().await;
        for id in chunk_ids {
            docs.remove(id);
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.docs.read().await.len())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

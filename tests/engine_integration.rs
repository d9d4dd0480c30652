//! End-to-end scenarios from spec.md §8: small-corpus reindex, edit-one-file
//! incrementality, exact-term and semantic queries, induced-failure
//! rollback, and clear-by-tech. Exercises `Engine` through `open_with` so no
//! network round-trip to fetch the real embedding model is needed; the
//! injected stores are the same in-memory stand-ins `Engine::open` uses in
//! production (spec §1 Non-goals treats the external stores as opaque).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use hybridocs::config::Config;
use hybridocs::engine::Engine;
use hybridocs::error::{EngineError, Result};
use hybridocs::keyword_store::{Filters, InMemoryKeywordStore, KeywordStore};
use hybridocs::query_planner::QueryEmbedder;
use hybridocs::vector_store::{InMemoryVectorStore, VectorPoint, VectorStore};
use hybridocs::writer::BatchEmbedder;

const DIM: usize = 32;

/// Deterministic bag-of-tokens embedder: hashes each word into a bucket and
/// accumulates, so cosine similarity tracks token overlap. Good enough to
/// exercise the fusion/boost pipeline without downloading the real model.
struct FakeEmbedder;

fn embed_text(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    for tok in text.to_ascii_lowercase().split(|c: char| !c.is_alphanumeric()) {
        if tok.is_empty() {
            continue;
        }
        let mut hasher = DefaultHasher::new();
        tok.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % DIM;
        v[idx] += 1.0;
    }
    v
}

impl QueryEmbedder for FakeEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(embed_text(text))
    }
}

impl BatchEmbedder for FakeEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed_text(t)).collect())
    }
}

fn test_config() -> Config {
    Config {
        embedding_dim: DIM,
        ..Config::default()
    }
}

async fn open_engine(repo_root: PathBuf) -> Engine {
    Engine::open_with(
        repo_root,
        test_config(),
        Arc::new(InMemoryKeywordStore::new()),
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(FakeEmbedder),
    )
    .await
    .expect("engine should open against healthy in-memory stores")
}

#[tokio::test]
async fn small_corpus_reindex_discovers_both_files() {
    let tmp = tempfile::TempDir::new().unwrap();
    std::fs::write(tmp.path().join("a.md"), "# Auth\nAuthentication notes.\n").unwrap();
    std::fs::write(tmp.path().join("b.md"), "# Models\nModel notes.\n").unwrap();

    let engine = open_engine(tmp.path().to_path_buf()).await;
    let stats = engine.index_paths(&[PathBuf::from(".")], false).await.unwrap();

    assert_eq!(stats.files_processed, 2);
    assert!(stats.chunks_added >= 2);

    let sources = engine.list_sources().await;
    assert!(sources.iter().any(|s| s.ends_with("a.md")));
    assert!(sources.iter().any(|s| s.ends_with("b.md")));
}

#[tokio::test]
async fn edit_one_file_reindex_touches_only_that_files_chunks() {
    let tmp = tempfile::TempDir::new().unwrap();
    std::fs::write(tmp.path().join("a.md"), "# Auth\nAuthentication notes.\n").unwrap();
    std::fs::write(tmp.path().join("b.md"), "# Models\nmodelzoo123 lives here.\n").unwrap();

    let engine = open_engine(tmp.path().to_path_buf()).await;
    let stats = engine.index_paths(&[PathBuf::from(".")], false).await.unwrap();
    assert_eq!(stats.files_processed, 2);

    let before = engine
        .search("modelzoo123", 5, Filters::default())
        .await;
    assert_eq!(before.len(), 1, "unique token should resolve to exactly one chunk");
    let b_chunk_id_before = before[0].chunk_id.clone();

    std::fs::write(
        tmp.path().join("a.md"),
        "# Auth\nAuthentication notes.\n\n# New Section\nSomething new.\n",
    )
    .unwrap();

    let stats2 = engine.index_paths(&[PathBuf::from(".")], false).await.unwrap();
    assert_eq!(stats2.files_processed, 1, "only a.md changed");
    assert_eq!(stats2.files_updated, 1);
    assert!(stats2.chunks_removed > 0, "a.md's old chunks must be removed before reinsertion");

    let after = engine.search("modelzoo123", 5, Filters::default()).await;
    assert_eq!(after.len(), 1);
    assert_eq!(
        after[0].chunk_id, b_chunk_id_before,
        "b.md was untouched, so its chunk_id must be unchanged"
    );
}

#[tokio::test]
async fn reindexing_unchanged_tree_is_idempotent() {
    let tmp = tempfile::TempDir::new().unwrap();
    std::fs::write(tmp.path().join("a.md"), "# Auth\nAuthentication notes.\n").unwrap();

    let engine = open_engine(tmp.path().to_path_buf()).await;
    let first = engine.index_paths(&[PathBuf::from(".")], false).await.unwrap();
    assert_eq!(first.files_processed, 1);

    let second = engine.index_paths(&[PathBuf::from(".")], false).await.unwrap();
    assert_eq!(second.files_processed, 0, "P3: unchanged tree reindex processes zero files");
    assert_eq!(second.chunks_added, 0);
    assert_eq!(second.chunks_removed, 0);
}

#[tokio::test]
async fn exact_term_query_ranks_the_matching_tech_scoped_doc_first() {
    let tmp = tempfile::TempDir::new().unwrap();
    let django_dir = tmp.path().join("docs/django-4.2/models");
    std::fs::create_dir_all(&django_dir).unwrap();
    std::fs::write(
        django_dir.join("fields.md"),
        "# Model Fields\nForeignKey fields reference another model by primary key.\n",
    )
    .unwrap();
    std::fs::write(
        tmp.path().join("unrelated.md"),
        "# Unrelated\nNothing about relational fields here.\n",
    )
    .unwrap();

    let engine = open_engine(tmp.path().to_path_buf()).await;
    engine.index_paths(&[PathBuf::from(".")], false).await.unwrap();

    let results = engine
        .search(
            "ForeignKey",
            10,
            Filters {
                tech: Some("django".to_string()),
                ..Default::default()
            },
        )
        .await;

    assert!(!results.is_empty());
    assert_eq!(results[0].tech, "django");
    assert!(results[0].norm_bm25 > 0.5, "exact term match should dominate bm25 norm: {}", results[0].norm_bm25);
}

#[tokio::test]
async fn semantic_query_returns_relevant_result_without_exact_phrase() {
    let tmp = tempfile::TempDir::new().unwrap();
    let django_dir = tmp.path().join("docs/django-4.2/auth");
    std::fs::create_dir_all(&django_dir).unwrap();
    std::fs::write(
        django_dir.join("overview.md"),
        "# Authentication Overview\nHow to authenticate users in your application.\n",
    )
    .unwrap();
    std::fs::write(
        tmp.path().join("docs/django-4.2/models/fields.md"),
        "# Model Fields\nForeignKey fields and database columns.\n",
    )
    .unwrap();

    let engine = open_engine(tmp.path().to_path_buf()).await;
    engine.index_paths(&[PathBuf::from(".")], false).await.unwrap();

    let results = engine
        .search(
            "How to authenticate users",
            10,
            Filters {
                tech: Some("django".to_string()),
                ..Default::default()
            },
        )
        .await;

    assert!(!results.is_empty());
    assert!(results[0].norm_sem > 0.5, "top hit should score well on the semantic side: {}", results[0].norm_sem);
}

#[tokio::test]
async fn every_result_obeys_score_bounds_and_sort_order() {
    let tmp = tempfile::TempDir::new().unwrap();
    std::fs::write(tmp.path().join("a.md"), "# Intro\nGetting started with the system.\n").unwrap();
    std::fs::write(tmp.path().join("b.md"), "# Reference\nfn call() { x(); }\n```\ncode here\n```\n").unwrap();

    let engine = open_engine(tmp.path().to_path_buf()).await;
    engine.index_paths(&[PathBuf::from(".")], false).await.unwrap();

    let results = engine.search("getting started system", 10, Filters::default()).await;
    assert!(!results.is_empty());

    for pair in results.windows(2) {
        assert!(pair[0].final_score >= pair[1].final_score, "results must sort non-increasing by final_score");
    }
    for r in &results {
        assert!((0.0..=1.0).contains(&r.norm_bm25), "norm_bm25 out of [0,1]: {}", r.norm_bm25);
        assert!((0.0..=1.0).contains(&r.norm_sem), "norm_sem out of [0,1]: {}", r.norm_sem);
        assert!((0.0..=1.5).contains(&r.final_score), "final_score out of [0,1.5]: {}", r.final_score);
    }
}

/// Vector store whose `upsert` always fails, to exercise the rollback path
/// (spec §4.4 failure semantics, property P5, scenario 5).
struct FailingUpsertVectorStore {
    inner: InMemoryVectorStore,
}

#[async_trait]
impl VectorStore for FailingUpsertVectorStore {
    async fn create_collection(&self, dim: usize) -> Result<()> {
        self.inner.create_collection(dim).await
    }
    async fn upsert(&self, _points: Vec<VectorPoint>) -> Result<()> {
        Err(EngineError::StoreUnavailable("simulated vector store outage".to_string()))
    }
    async fn query(&self, vector: &[f32], filters: &Filters, limit: usize) -> Result<Vec<(i64, String, f32)>> {
        self.inner.query(vector, filters, limit).await
    }
    async fn delete(&self, ids: &[i64]) -> Result<()> {
        self.inner.delete(ids).await
    }
    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }
}

#[tokio::test]
async fn induced_vector_store_failure_rolls_back_both_stores_and_cache() {
    let tmp = tempfile::TempDir::new().unwrap();
    std::fs::write(tmp.path().join("a.md"), "# Auth\nAuthentication notes.\n").unwrap();
    std::fs::write(tmp.path().join("b.md"), "# Models\nModel notes.\n").unwrap();

    let keyword_store = Arc::new(InMemoryKeywordStore::new());
    let vector_store = Arc::new(FailingUpsertVectorStore {
        inner: InMemoryVectorStore::new(),
    });

    let engine = Engine::open_with(
        tmp.path().to_path_buf(),
        test_config(),
        keyword_store.clone(),
        vector_store.clone(),
        Arc::new(FakeEmbedder),
    )
    .await
    .unwrap();

    let result = engine.index_paths(&[PathBuf::from(".")], false).await;
    assert!(result.is_err(), "a persistent vector-store failure must surface as an error (P5)");

    let (cache_size, keyword_count) = engine.get_stats().await;
    assert_eq!(cache_size, 0, "metadata cache must be rolled back to its pre-call state");
    assert_eq!(keyword_count, 0, "keyword store must be rolled back to its pre-call state");
    assert_eq!(vector_store.count().await.unwrap(), 0, "vector store must be rolled back to its pre-call state");
}

/// Vector store whose `upsert` fails for its first few calls (outlasting the
/// writer's own retry-with-backoff budget), then recovers permanently, to
/// exercise a rolled-back file getting picked up again on the very next
/// reindex (spec §4.4 P4/P5: rollback must not leave files looking
/// "unchanged").
struct FlakyOnceVectorStore {
    inner: InMemoryVectorStore,
    calls_before_recovery: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl VectorStore for FlakyOnceVectorStore {
    async fn create_collection(&self, dim: usize) -> Result<()> {
        self.inner.create_collection(dim).await
    }
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        let remaining = self.calls_before_recovery.fetch_update(
            std::sync::atomic::Ordering::SeqCst,
            std::sync::atomic::Ordering::SeqCst,
            |n| Some(n.saturating_sub(1)),
        );
        if remaining.unwrap_or(0) > 0 {
            return Err(EngineError::StoreUnavailable("simulated vector store outage".to_string()));
        }
        self.inner.upsert(points).await
    }
    async fn query(&self, vector: &[f32], filters: &Filters, limit: usize) -> Result<Vec<(i64, String, f32)>> {
        self.inner.query(vector, filters, limit).await
    }
    async fn delete(&self, ids: &[i64]) -> Result<()> {
        self.inner.delete(ids).await
    }
    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }
}

#[tokio::test]
async fn rolled_back_file_is_reindexed_on_the_next_attempt() {
    let tmp = tempfile::TempDir::new().unwrap();
    std::fs::write(tmp.path().join("a.md"), "# Auth\nAuthentication notes.\n").unwrap();

    let keyword_store = Arc::new(InMemoryKeywordStore::new());
    let vector_store = Arc::new(FlakyOnceVectorStore {
        inner: InMemoryVectorStore::new(),
        // Outlasts MAX_ATTEMPTS (3) so the first index_paths call exhausts
        // its retries and fails outright; recovered well before the second.
        calls_before_recovery: std::sync::atomic::AtomicUsize::new(10),
    });

    let engine = Engine::open_with(
        tmp.path().to_path_buf(),
        test_config(),
        keyword_store.clone(),
        vector_store.clone(),
        Arc::new(FakeEmbedder),
    )
    .await
    .unwrap();

    let first = engine.index_paths(&[PathBuf::from(".")], false).await;
    assert!(first.is_err(), "the induced one-shot failure must surface as an error");

    let second = engine.index_paths(&[PathBuf::from(".")], false).await.unwrap();
    assert_eq!(
        second.files_processed, 1,
        "a.md must not be skipped as 'unchanged' after its chunks were rolled back"
    );
    assert!(second.chunks_added > 0);

    let (cache_size, _) = engine.get_stats().await;
    assert!(cache_size > 0, "the retry should have actually landed a.md's chunks");
}

#[tokio::test]
async fn clear_all_resets_the_change_tracker_so_reindex_picks_everything_back_up() {
    let tmp = tempfile::TempDir::new().unwrap();
    std::fs::write(tmp.path().join("a.md"), "# Auth\nAuthentication notes.\n").unwrap();

    let engine = open_engine(tmp.path().to_path_buf()).await;
    let first = engine.index_paths(&[PathBuf::from(".")], false).await.unwrap();
    assert_eq!(first.files_processed, 1);

    engine.clear_all().await.unwrap();

    let after_clear = engine.index_paths(&[PathBuf::from(".")], false).await.unwrap();
    assert_eq!(
        after_clear.files_processed, 1,
        "clear_all must empty the checksum map so every file looks new again"
    );
    assert!(after_clear.chunks_added > 0);
}

#[tokio::test]
async fn clear_by_tech_removes_only_the_matching_entries() {
    let tmp = tempfile::TempDir::new().unwrap();
    std::fs::create_dir_all(tmp.path().join("docs/django-4.2")).unwrap();
    std::fs::create_dir_all(tmp.path().join("docs/drf-3.14")).unwrap();
    std::fs::create_dir_all(tmp.path().join("docs/psycopg-3.1")).unwrap();
    std::fs::write(tmp.path().join("docs/django-4.2/models.md"), "# Models\nDjango models overview.\n").unwrap();
    std::fs::write(tmp.path().join("docs/drf-3.14/serializers.md"), "# Serializers\nDRF serializer overview.\n").unwrap();
    std::fs::write(tmp.path().join("docs/psycopg-3.1/cursor.md"), "# Cursor\npsycopg cursor overview.\n").unwrap();

    let engine = open_engine(tmp.path().to_path_buf()).await;
    engine.index_paths(&[PathBuf::from(".")], false).await.unwrap();

    let removed = engine.clear_tech("drf").await.unwrap();
    assert!(removed > 0);

    let drf_hits = engine
        .search(
            "serializer",
            10,
            Filters {
                tech: Some("drf".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert!(drf_hits.is_empty(), "drf entries must be gone after clear_tech");

    let django_hits = engine
        .search(
            "models",
            10,
            Filters {
                tech: Some("django".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert!(!django_hits.is_empty(), "django entries must be untouched by clear_tech(\"drf\")");

    let psycopg_hits = engine
        .search(
            "cursor",
            10,
            Filters {
                tech: Some("psycopg".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert!(!psycopg_hits.is_empty(), "psycopg entries must be untouched by clear_tech(\"drf\")");
}

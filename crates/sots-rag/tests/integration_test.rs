//! Integration tests for the sots-rag crate.
//!
//! These tests run the indexer and query end to end over scratch project
//! trees using deterministic hash embeddings.

use std::fs;
use std::path::Path;

use anyhow::Result;
use tempfile::{tempdir, TempDir};

use sots_rag::embeddings::{BackendKind, EmbeddingBackend, EmbeddingProvider};
use sots_rag::manifest::ManifestDiff;
use sots_rag::repo_index::{NoSymbolIndex, RepoIndexBridge};
use sots_rag::storage::ArtifactStore;
use sots_rag::{
    IndexManifest, IndexStats, IndexerConfig, QueryConfig, QueryError, RagIndexer, RagQuery,
    BM25_FILE, CHUNKS_FILE, MANIFEST_FILE, VECTOR_FILE,
};

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn foo_bar_project() -> TempDir {
    let dir = tempdir().unwrap();
    write(dir.path(), "Source/Game/foo.py", "def foo(): pass\n");
    write(dir.path(), "Source/Game/bar.py", "def bar(): pass\n");
    dir
}

fn index_with(config: IndexerConfig, provider: EmbeddingProvider) -> IndexStats {
    RagIndexer::with_symbol_index(config, provider, Box::new(NoSymbolIndex))
        .run()
        .unwrap()
}

fn index(root: &Path) -> IndexStats {
    index_with(IndexerConfig::new(root), EmbeddingProvider::hash())
}

fn open_query(root: &Path) -> RagQuery {
    RagQuery::with_symbol_index(
        &root.join("Reports/RAG"),
        EmbeddingProvider::hash(),
        Box::new(NoSymbolIndex),
    )
    .unwrap()
}

fn artifact_bytes(reports: &Path) -> Vec<Vec<u8>> {
    [MANIFEST_FILE, CHUNKS_FILE, BM25_FILE, VECTOR_FILE]
        .iter()
        .map(|name| fs::read(reports.join(name)).unwrap())
        .collect()
}

/// Indexing two tiny files and asking for `foo` puts foo.py first.
#[test]
fn test_foo_bar_end_to_end() {
    let dir = foo_bar_project();
    let stats = index(dir.path());
    assert_eq!(stats.files_scanned, 2);
    assert_eq!(stats.chunks_total, 2);
    assert!(!stats.repo_index_loaded);

    let query = open_query(dir.path());
    let report = query.run("foo", &QueryConfig::default()).unwrap();

    assert_eq!(report.stats.exact_hits, 0);
    assert_eq!(report.stats.bm25_candidates, 1);
    assert!(!report.repo_index_available);
    let top = &report.top_hits[0];
    assert_eq!(top.rank, 1);
    assert_eq!(top.path, "Source/Game/foo.py");
    assert_eq!(top.module, "Game");
    assert_eq!(top.snippet, "def foo(): pass");
    assert_eq!(top.how_to_open, "Source/Game/foo.py:1-1");
    assert!(top.score_breakdown.bm25.is_some());
    for pair in report.top_hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

/// A second run with no file changes leaves every artifact byte-identical.
#[test]
fn test_noop_run_is_byte_identical() {
    let dir = foo_bar_project();
    let reports = dir.path().join("Reports/RAG");

    index(dir.path());
    let before = artifact_bytes(&reports);
    let stats = index(dir.path());
    let after = artifact_bytes(&reports);

    assert_eq!(stats.files_changed, 0);
    assert_eq!(stats.files_deleted, 0);
    assert_eq!(stats.embeddings_computed, 0);
    assert!(!stats.full_rebuild);
    assert_eq!(before, after);
}

/// Deleting a file removes its chunks from every structure.
#[test]
fn test_deleted_file_is_cleaned_up() {
    let dir = foo_bar_project();
    index(dir.path());
    let store = ArtifactStore::new(dir.path().join("Reports/RAG"));
    let bar_ids = store.load().artifacts.manifest.get("Source/Game/bar.py").unwrap().chunk_ids.clone();

    fs::remove_file(dir.path().join("Source/Game/bar.py")).unwrap();
    let stats = index(dir.path());
    assert_eq!(stats.files_deleted, 1);
    assert_eq!(stats.chunks_total, 1);

    let artifacts = store.load().artifacts;
    assert!(artifacts.manifest.get("Source/Game/bar.py").is_none());
    for id in &bar_ids {
        assert!(!artifacts.chunks.contains_key(id));
        assert!(!artifacts.bm25.contains(id));
        assert!(!artifacts.vectors.contains(id));
    }
    assert_eq!(artifacts.bm25.doc_freq("bar"), 0);
    assert!(artifacts.is_consistent());

    let report = open_query(dir.path()).run("bar", &QueryConfig::default()).unwrap();
    assert!(report.top_hits.iter().all(|h| h.path != "Source/Game/bar.py"));
}

/// An incrementally maintained index equals a full rebuild of the same tree.
#[test]
fn test_incremental_matches_full_rebuild() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "Source/A/a.cpp", "void Alpha() {}\n");
    write(root, "Source/A/b.h", "struct Beta;\n");
    write(root, "Docs/c.md", "# Gamma\n");

    let incremental = IndexerConfig::new(root);
    index_with(incremental.clone(), EmbeddingProvider::hash());

    write(root, "Source/A/a.cpp", "void Alpha() { Delta(); }\n");
    fs::remove_file(root.join("Source/A/b.h")).unwrap();
    write(root, "Source/A/e.inl", "inline int Epsilon = 4;\n");
    index_with(incremental.clone(), EmbeddingProvider::hash());

    let mut full = IndexerConfig::new(root);
    full.reports_dir = root.join("Reports/FULL");
    full.full = true;
    let stats = index_with(full.clone(), EmbeddingProvider::hash());
    assert!(stats.full_rebuild);

    let inc = ArtifactStore::new(&incremental.reports_dir).load().artifacts;
    let fresh = ArtifactStore::new(&full.reports_dir).load().artifacts;
    assert_eq!(inc.chunks, fresh.chunks);
    assert_eq!(inc.bm25.to_snapshot(), fresh.bm25.to_snapshot());
    assert_eq!(inc.vectors.to_snapshot(), fresh.vectors.to_snapshot());

    let summary = |m: &IndexManifest| -> Vec<(String, String, Vec<String>)> {
        m.files
            .values()
            .map(|s| (s.path.clone(), s.content_hash.clone(), s.chunk_ids.clone()))
            .collect()
    };
    assert_eq!(summary(&inc.manifest), summary(&fresh.manifest));
}

/// Full mode reports files missing from the old manifest as deleted.
#[test]
fn test_full_mode_accounting() {
    let dir = foo_bar_project();
    index(dir.path());
    fs::remove_file(dir.path().join("Source/Game/bar.py")).unwrap();
    write(dir.path(), "Source/Game/baz.py", "def baz(): pass\n");

    let mut config = IndexerConfig::new(dir.path());
    config.full = true;
    let stats = index_with(config, EmbeddingProvider::hash());

    assert!(stats.full_rebuild);
    assert_eq!(stats.files_changed, 2);
    assert_eq!(stats.files_added, 1);
    assert_eq!(stats.files_deleted, 1);
    assert_eq!(stats.embeddings_computed, 2);
}

struct TinyBackend;

impl EmbeddingBackend for TinyBackend {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(vec![text.len() as f32, 1.0, 0.0])
    }

    fn dimensions(&self) -> usize {
        3
    }

    fn model_name(&self) -> &str {
        "tiny"
    }
}

/// Querying with a provider of a different dimension fails loudly.
#[test]
fn test_query_dimension_mismatch() {
    let dir = foo_bar_project();
    index_with(
        IndexerConfig::new(dir.path()),
        EmbeddingProvider::from_backend(Box::new(TinyBackend), BackendKind::Remote),
    );

    let result = RagQuery::with_symbol_index(
        &dir.path().join("Reports/RAG"),
        EmbeddingProvider::hash(),
        Box::new(NoSymbolIndex),
    );
    match result {
        Err(QueryError::DimensionMismatch {
            index_dim,
            provider_dim,
            ..
        }) => {
            assert_eq!(index_dim, 3);
            assert_eq!(provider_dim, 64);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected a dimension mismatch"),
    }
}

/// Switching embedding model triggers a full rebuild on the next index run.
#[test]
fn test_model_change_forces_rebuild() {
    let dir = foo_bar_project();
    index_with(
        IndexerConfig::new(dir.path()),
        EmbeddingProvider::from_backend(Box::new(TinyBackend), BackendKind::Remote),
    );
    let stats = index(dir.path());
    assert!(stats.full_rebuild);
    assert!(stats.rebuild_reason.unwrap().contains("dimension"));
    assert_eq!(stats.embeddings_computed, 2);
}

/// A corrupt artifact is treated as empty and the next run rebuilds.
#[test]
fn test_corrupt_artifact_recovery() {
    let dir = foo_bar_project();
    let reports = dir.path().join("Reports/RAG");
    index(dir.path());
    fs::write(reports.join(BM25_FILE), "{\"schema_version\": 1, \"k1\":").unwrap();

    let stats = index(dir.path());
    assert!(stats.full_rebuild);
    assert!(stats.rebuild_reason.unwrap().contains(BM25_FILE));
    assert_eq!(stats.chunks_total, 2);

    let loaded = ArtifactStore::new(&reports).load();
    assert!(loaded.corrupt.is_empty());
    assert!(loaded.artifacts.is_consistent());
    let report = open_query(dir.path()).run("foo", &QueryConfig::default()).unwrap();
    assert_eq!(report.top_hits[0].path, "Source/Game/foo.py");
}

/// A chunk sharing no term with the query is found by vectors only.
#[test]
fn test_unshared_terms_reach_results_through_vectors() {
    let dir = foo_bar_project();
    index(dir.path());
    let report = open_query(dir.path())
        .run("foo", &QueryConfig::default())
        .unwrap();

    assert_eq!(report.stats.bm25_candidates, 1);
    let bar = report
        .top_hits
        .iter()
        .find(|h| h.path == "Source/Game/bar.py")
        .unwrap();
    assert!(bar.score_breakdown.bm25.is_none());
    assert!(bar.score_breakdown.vector.is_some());

    let lexical_only = QueryConfig {
        vec_n: 0,
        ..QueryConfig::default()
    };
    let report = open_query(dir.path()).run("foo", &lexical_only).unwrap();
    assert_eq!(report.top_hits.len(), 1);
    assert_eq!(report.top_hits[0].path, "Source/Game/foo.py");
}

/// A reader refuses artifacts that do not belong to one save.
#[test]
fn test_query_refuses_mixed_artifacts() {
    let dir = foo_bar_project();
    let reports = dir.path().join("Reports/RAG");
    index(dir.path());

    let chunks = fs::read_to_string(reports.join(CHUNKS_FILE)).unwrap();
    let first_line = chunks.lines().next().unwrap().to_string();
    fs::write(reports.join(CHUNKS_FILE), format!("{}\n", first_line)).unwrap();
    let result = RagQuery::with_symbol_index(&reports, EmbeddingProvider::hash(), Box::new(NoSymbolIndex));
    assert!(matches!(result, Err(QueryError::InconsistentIndex { .. })));

    index(dir.path());
    fs::write(reports.join(BM25_FILE), "not json").unwrap();
    let result = RagQuery::with_symbol_index(&reports, EmbeddingProvider::hash(), Box::new(NoSymbolIndex));
    match result {
        Err(QueryError::InconsistentIndex { reason, .. }) => assert!(reason.contains(BM25_FILE)),
        other => panic!("expected an inconsistent index, got {:?}", other.map(|_| ())),
    }
}

/// Two queries stamped with the same time keep separate outputs.
#[test]
fn test_query_outputs_do_not_collide() {
    let dir = foo_bar_project();
    index(dir.path());
    let query = open_query(dir.path());
    let report = query.run("foo", &QueryConfig::default()).unwrap();

    let first = sots_rag::report::write_query_outputs(query.paths(), &report).unwrap();
    let second = sots_rag::report::write_query_outputs(query.paths(), &report).unwrap();
    assert_ne!(first.json, second.json);
    assert_ne!(first.log, second.log);
    assert!(first.json.exists() && second.json.exists());
    assert!(second.txt.to_string_lossy().ends_with("_1.txt"));
}

/// Exact symbol matches from the repo index resolve to the owning chunk.
#[test]
fn test_exact_symbol_hit() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let mut body = String::new();
    for i in 1..=400 {
        body.push_str(&format!("int filler_{} = {};\n", i, i));
    }
    write(root, "Plugins/SOTS_AI/Source/SOTS_AI/Private/Brain.cpp", &body);
    write(
        root,
        "Reports/RepoIndex/symbol_map.json",
        r#"[{"name": "USOTS_Brain", "source": "Plugins/SOTS_AI/Source/SOTS_AI/Private/Brain.cpp", "line": 350}]"#,
    );

    let mut indexer = RagIndexer::new(IndexerConfig::new(root), EmbeddingProvider::hash());
    let stats = indexer.run().unwrap();
    assert!(stats.repo_index_loaded);
    assert_eq!(stats.chunks_total, 2);

    let query = RagQuery::open(root, &root.join("Reports/RAG"), EmbeddingProvider::hash()).unwrap();
    let config = QueryConfig {
        rerank: true,
        ..QueryConfig::default()
    };
    let report = query.run("where is USOTS_Brain", &config).unwrap();
    assert_eq!(report.stats.exact_hits, 1);
    assert!(report.repo_index_available);

    let top = &report.top_hits[0];
    assert_eq!((top.start_line, top.end_line), (301, 400));
    assert_eq!(top.plugin, "SOTS_AI");
    assert_eq!(top.symbol_hits, vec!["USOTS_Brain"]);
    assert!(top.score_breakdown.exact.is_some());
    assert!(top.score_breakdown.rerank.unwrap() >= 0.2);
}

/// Query reports land next to the index in three formats.
#[test]
fn test_query_outputs_written() {
    let dir = foo_bar_project();
    index(dir.path());
    let query = open_query(dir.path());
    let report = query.run("bar", &QueryConfig::default()).unwrap();
    let outputs = sots_rag::report::write_query_outputs(query.paths(), &report).unwrap();

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&outputs.json).unwrap()).unwrap();
    assert_eq!(json["query"], "bar");
    assert_eq!(json["top_hits"][0]["path"], "Source/Game/bar.py");
    assert!(json["stats"]["bm25_candidates"].as_u64().unwrap() >= 1);
    let txt = fs::read_to_string(&outputs.txt).unwrap();
    assert!(txt.contains("How to open: Source/Game/bar.py:1-1"));
    let log = fs::read_to_string(&outputs.log).unwrap();
    assert!(log.starts_with("[rag_query] Query: bar"));
}

/// Two snapshots differ by exactly the files that were touched.
#[test]
fn test_snapshot_diff() {
    let dir = foo_bar_project();
    let root = dir.path();
    let mut first = IndexerConfig::new(root);
    first.reports_dir = root.join("Reports/Snap1");
    index_with(first.clone(), EmbeddingProvider::hash());

    write(root, "Source/Game/foo.py", "def foo(): return 1\n");
    fs::remove_file(root.join("Source/Game/bar.py")).unwrap();
    write(root, "Source/Game/qux.py", "def qux(): pass\n");
    let mut second = IndexerConfig::new(root);
    second.reports_dir = root.join("Reports/Snap2");
    index_with(second.clone(), EmbeddingProvider::hash());

    let old = IndexManifest::load(&first.reports_dir.join(MANIFEST_FILE)).unwrap();
    let new = IndexManifest::load(&second.reports_dir.join(MANIFEST_FILE)).unwrap();
    let diff = ManifestDiff::between(&old, &new);
    assert_eq!(diff.added, vec!["Source/Game/qux.py"]);
    assert_eq!(diff.removed, vec!["Source/Game/bar.py"]);
    assert_eq!(diff.changed, vec!["Source/Game/foo.py"]);
}

/// The bridge loads nothing when the repo index is absent.
#[test]
fn test_absent_repo_index() {
    let dir = foo_bar_project();
    let bridge = RepoIndexBridge::load(dir.path());
    let query = RagQuery::with_symbol_index(
        &dir.path().join("Reports/RAG"),
        EmbeddingProvider::hash(),
        Box::new(bridge),
    )
    .unwrap();
    assert!(query.is_empty());
}

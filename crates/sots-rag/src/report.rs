//! Human, JSON and log renderings of index and query runs.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Local, SecondsFormat};
use serde::Serialize;
use tracing::info;

use crate::indexer::{IndexStats, IndexerConfig};
use crate::manifest::ManifestDiff;
use crate::query::QueryReport;
use crate::storage::{write_atomic, IndexPaths, StorageError};

/// Timestamped run log, mirrored to `tracing` and appended to a file.
#[derive(Debug, Clone)]
pub struct RunLog {
    tag: &'static str,
    lines: Vec<String>,
}

impl RunLog {
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            lines: Vec::new(),
        }
    }

    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!(target: "sots_rag::run", "[{}] {}", self.tag, message);
        let now = Local::now().to_rfc3339_opts(SecondsFormat::Secs, false);
        self.lines.push(format!("{} {}", now, message));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Append buffered lines to `path` and clear the buffer.
    pub fn flush_to(&mut self, path: &Path) -> Result<(), StorageError> {
        if self.lines.is_empty() {
            return Ok(());
        }
        let io_err = |source: std::io::Error| StorageError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;
        for line in self.lines.drain(..) {
            writeln!(file, "{}", line).map_err(io_err)?;
        }
        Ok(())
    }
}

/// Text summary of an index run.
pub fn render_index_report(config: &IndexerConfig, stats: &IndexStats) -> String {
    let mut lines = vec![
        "RAG Index Report".to_string(),
        format!(
            "Generated: {}",
            Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
        ),
        format!("Project root: {}", config.project_root.display()),
        format!("Include code: {}", config.scan.include_code),
        format!("Include docs: {}", config.scan.include_docs),
    ];
    let patterns = config.scan.plugin_patterns();
    if !patterns.is_empty() {
        lines.push(format!("Plugin filter: {}", patterns.join(", ")));
    }
    lines.push(format!("Embedding model: {}", stats.embedding_model));
    if let Some(reason) = &stats.embedding_fallback {
        lines.push(format!("Embedding fallback: {}", reason));
    }
    match &stats.rebuild_reason {
        Some(reason) => lines.push(format!("Full rebuild: {}", reason)),
        None => lines.push("Mode: incremental".to_string()),
    }
    lines.push(String::new());
    lines.push(format!("Files scanned: {}", stats.files_scanned));
    lines.push(format!("Files added: {}", stats.files_added));
    lines.push(format!("Files changed: {}", stats.files_changed));
    lines.push(format!("Files deleted: {}", stats.files_deleted));
    lines.push(format!("Files skipped: {}", stats.files_skipped));
    if !stats.has_changes() {
        lines.push("No changes detected (zero files added, changed or deleted)".to_string());
    }
    lines.push(String::new());
    lines.push(format!(
        "Chunks stored: {} (new: {})",
        stats.chunks_total, stats.chunks_added
    ));
    lines.push(format!("Embeddings computed: {}", stats.embeddings_computed));
    lines.push(format!("RepoIndex data available: {}", stats.repo_index_loaded));
    lines.push(format!("Elapsed (s): {:.2}", stats.elapsed.as_secs_f64()));
    lines.join("\n")
}

/// Files written for one query.
#[derive(Debug, Clone)]
pub struct QueryOutputs {
    pub json: PathBuf,
    pub txt: PathBuf,
    pub log: PathBuf,
}

fn hit_line(rank: usize, path: &str, start: usize, end: usize, score: f64) -> String {
    format!("{}. {} ({}-{}) score={:.3}", rank, path, start, end, score)
}

pub fn render_query_text(report: &QueryReport) -> String {
    let mut lines = vec![
        "RAG Query Report".to_string(),
        format!("Query: {}", report.query),
        format!("Timestamp: {}", report.timestamp),
        format!("RepoIndex available: {}", report.repo_index_available),
        String::new(),
        "Top Hits:".to_string(),
    ];
    for hit in &report.top_hits {
        lines.push(hit_line(hit.rank, &hit.path, hit.start_line, hit.end_line, hit.score));
        if !hit.snippet.is_empty() {
            lines.push(format!("    Snippet: {}", hit.snippet));
        }
        lines.push(format!("    How to open: {}", hit.how_to_open));
    }
    lines.join("\n")
}

pub fn render_query_log(report: &QueryReport) -> String {
    let mut lines = vec![
        format!("[rag_query] Query: {}", report.query),
        format!("[rag_query] RepoIndex available: {}", report.repo_index_available),
        format!("[rag_query] Exact hits: {}", report.stats.exact_hits),
        format!("[rag_query] BM25 candidates: {}", report.stats.bm25_candidates),
        format!("[rag_query] Vector candidates: {}", report.stats.vector_candidates),
        "[rag_query] Top hits:".to_string(),
    ];
    for hit in &report.top_hits {
        lines.push(format!(
            "[rag_query] {}",
            hit_line(hit.rank, &hit.path, hit.start_line, hit.end_line, hit.score)
        ));
    }
    lines.extend(report.log_lines.iter().cloned());
    lines.join("\n")
}

fn pretty_json<T: Serialize>(name: &'static str, value: &T) -> Result<String, StorageError> {
    serde_json::to_string_pretty(value).map_err(|source| StorageError::Serialize { name, source })
}

/// Write the `.json`, `.txt` and `.log` renderings of a query.
pub fn write_query_outputs(
    paths: &IndexPaths,
    report: &QueryReport,
) -> Result<QueryOutputs, StorageError> {
    std::fs::create_dir_all(&paths.dir).map_err(|source| StorageError::Io {
        path: paths.dir.clone(),
        source,
    })?;
    // Never overwrite the outputs of an earlier query with the same timestamp.
    let mut stem = report.timestamp.clone();
    let mut attempt = 1;
    while ["json", "txt", "log"]
        .iter()
        .any(|ext| paths.query_output(&stem, ext).exists())
    {
        stem = format!("{}_{}", report.timestamp, attempt);
        attempt += 1;
    }
    let outputs = QueryOutputs {
        json: paths.query_output(&stem, "json"),
        txt: paths.query_output(&stem, "txt"),
        log: paths.query_output(&stem, "log"),
    };
    write_atomic(&outputs.json, pretty_json("query report", report)?.as_bytes())?;
    write_atomic(&outputs.txt, render_query_text(report).as_bytes())?;
    write_atomic(&outputs.log, render_query_log(report).as_bytes())?;
    Ok(outputs)
}

#[derive(Serialize)]
struct DiffCounts {
    added: usize,
    removed: usize,
    changed: usize,
}

#[derive(Serialize)]
struct DiffPayload<'a> {
    added: &'a [String],
    removed: &'a [String],
    changed: &'a [String],
    counts: DiffCounts,
}

fn diff_section(lines: &mut Vec<String>, title: &str, items: &[String]) {
    lines.push(format!("{} ({}):", title, items.len()));
    if items.is_empty() {
        lines.push("  (none)".to_string());
    } else {
        lines.extend(items.iter().map(|p| format!("  {}", p)));
    }
    lines.push(String::new());
}

pub fn render_diff_text(old: &Path, new: &Path, diff: &ManifestDiff) -> String {
    let mut lines = vec![
        "RAG Snapshot Diff".to_string(),
        format!("Old snapshot: {}", old.display()),
        format!("New snapshot: {}", new.display()),
        String::new(),
        format!(
            "Counts: added={} removed={} changed={}",
            diff.added.len(),
            diff.removed.len(),
            diff.changed.len()
        ),
        String::new(),
    ];
    diff_section(&mut lines, "Added", &diff.added);
    diff_section(&mut lines, "Removed", &diff.removed);
    diff_section(&mut lines, "Changed", &diff.changed);
    lines.join("\n")
}

pub fn render_diff_json(diff: &ManifestDiff) -> Result<String, StorageError> {
    pretty_json(
        "snapshot diff",
        &DiffPayload {
            added: &diff.added,
            removed: &diff.removed,
            changed: &diff.changed,
            counts: DiffCounts {
                added: diff.added.len(),
                removed: diff.removed.len(),
                changed: diff.changed.len(),
            },
        },
    )
}

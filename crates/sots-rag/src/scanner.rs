//! File discovery for indexing.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use tracing::debug;

use crate::chunker::ChunkKind;

/// Directory names never descended into (compared case-insensitively).
pub const SKIP_DIRS: &[&str] = &[
    "binaries",
    "intermediate",
    "saved",
    "deriveddatacache",
    ".git",
    ".vs",
    "node_modules",
    "reports",
    "devtools",
    "target",
];

/// What to collect.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Code and config files
    pub include_code: bool,
    pub include_docs: bool,
    /// Comma separated globs matched against the plugin name
    pub plugin_filter: String,
    pub respect_gitignore: bool,
    /// Never descended into, wherever it lives
    pub reports_dir: Option<PathBuf>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            include_code: true,
            include_docs: true,
            plugin_filter: String::new(),
            respect_gitignore: false,
            reports_dir: None,
        }
    }
}

impl ScanOptions {
    fn accepts(&self, kind: ChunkKind) -> bool {
        match kind {
            ChunkKind::Code | ChunkKind::Config => self.include_code,
            ChunkKind::Doc => self.include_docs,
        }
    }

    /// Individual patterns of the plugin filter.
    pub fn plugin_patterns(&self) -> Vec<String> {
        self.plugin_filter
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// A file selected for indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub abs_path: PathBuf,
    /// Relative to the project root, forward slashes
    pub rel_path: String,
    pub kind: ChunkKind,
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid plugin filter '{}'", pattern))?);
    }
    Ok(Some(builder.build()?))
}

/// Repo-relative path with forward slashes.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Segment after `Plugins/`, if any.
pub fn plugin_name(rel_path: &str) -> Option<&str> {
    let mut parts = rel_path.split('/');
    parts.by_ref().find(|p| *p == "Plugins")?;
    parts.next()
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Collect indexable files under `root`, sorted by relative path.
pub fn collect_files(root: &Path, options: &ScanOptions) -> Result<Vec<ScannedFile>> {
    if !options.include_code && !options.include_docs {
        return Ok(Vec::new());
    }
    let root = canonical(root);
    let plugin_filter = build_globset(&options.plugin_patterns())?;
    let reports_dir = options.reports_dir.as_deref().map(canonical);

    let walker = WalkBuilder::new(&root)
        .hidden(false)
        .git_ignore(options.respect_gitignore)
        .git_global(options.respect_gitignore)
        .git_exclude(options.respect_gitignore)
        .ignore(options.respect_gitignore)
        .parents(options.respect_gitignore)
        .filter_entry(move |entry| {
            if !entry.file_type().is_some_and(|t| t.is_dir()) {
                return true;
            }
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy().to_lowercase();
            if SKIP_DIRS.contains(&name.as_str()) {
                return false;
            }
            reports_dir.as_deref() != Some(entry.path())
        })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        let Some(kind) = ChunkKind::for_path(path) else {
            continue;
        };
        if !options.accepts(kind) {
            continue;
        }
        let Some(rel_path) = relative_path(&root, path) else {
            continue;
        };
        if let Some(filter) = &plugin_filter {
            match plugin_name(&rel_path) {
                Some(plugin) if filter.is_match(plugin) => {}
                _ => continue,
            }
        }
        files.push(ScannedFile {
            abs_path: path.to_path_buf(),
            rel_path,
            kind,
        });
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    debug!(count = files.len(), root = %root.display(), "Collected files");
    Ok(files)
}

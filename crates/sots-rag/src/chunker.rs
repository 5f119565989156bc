//! Line-window chunking.
//!
//! Files are split into ordered, non-overlapping windows of whole lines so
//! that every line belongs to exactly one chunk. Chunk ids depend only on
//! the path and line range; the content hash tells whether the text under
//! an id has changed.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::repo_index::SymbolIndex;

/// Coarse category of an indexed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Code,
    Config,
    Doc,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Config => "config",
            Self::Doc => "doc",
        }
    }

    /// Classify a file by extension. Unknown extensions are not indexable.
    pub fn for_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "h" | "hpp" | "cpp" | "inl" | "c" | "cc" | "rs" | "py" => Some(Self::Code),
            "cs" | "uplugin" | "ini" | "toml" | "json" => Some(Self::Config),
            "md" | "txt" => Some(Self::Doc),
            _ => None,
        }
    }

    pub fn for_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::for_extension)
    }
}

/// Window sizes in lines per chunk kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSizes {
    pub code: usize,
    pub config: usize,
    pub doc: usize,
}

impl Default for ChunkSizes {
    fn default() -> Self {
        Self {
            code: 300,
            config: 250,
            doc: 600,
        }
    }
}

impl ChunkSizes {
    pub fn for_kind(&self, kind: ChunkKind) -> usize {
        let size = match kind {
            ChunkKind::Code => self.code,
            ChunkKind::Config => self.config,
            ChunkKind::Doc => self.doc,
        };
        size.max(1)
    }
}

/// A contiguous line range of a file, the unit that gets indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    /// Repo-relative path with forward slashes
    pub path: String,
    #[serde(default)]
    pub plugin: String,
    #[serde(default)]
    pub module: String,
    pub kind: ChunkKind,
    /// 1-indexed, inclusive
    pub start_line: usize,
    /// 1-indexed, inclusive
    pub end_line: usize,
    pub text: String,
    #[serde(default)]
    pub symbol_hits: Vec<String>,
    #[serde(default)]
    pub tag_hits: Vec<String>,
    pub mtime: i64,
    pub size: u64,
    pub content_hash: String,
}

impl Chunk {
    /// `path:start-end`, the pointer shown to users.
    pub fn location(&self) -> String {
        format!("{}:{}-{}", self.path, self.start_line, self.end_line)
    }

    pub fn contains_line(&self, line: usize) -> bool {
        self.start_line <= line && line <= self.end_line
    }
}

/// SHA-256 hex digest.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Stable id for a path and line range.
pub fn chunk_id(path: &str, start_line: usize, end_line: usize) -> String {
    sha256_hex(format!("{}|{}|{}", path, start_line, end_line).as_bytes())
}

/// Ownership tags derived from a repo-relative path.
///
/// `plugin` is the segment after `Plugins/` and `module` the segment after
/// `Source/`. When the path has no `Source/` segment the symbol index's
/// module table is consulted.
pub fn infer_plugin_module(rel_path: &str, symbols: &dyn SymbolIndex) -> (String, String) {
    let parts: Vec<&str> = rel_path.split('/').collect();
    let after = |marker: &str| -> String {
        parts
            .iter()
            .position(|p| *p == marker)
            .and_then(|i| parts.get(i + 1))
            .map(|s| s.to_string())
            .unwrap_or_default()
    };

    let mut plugin = after("Plugins");
    let mut module = after("Source");
    if !parts.contains(&"Source") {
        if let Some((name, owner)) = symbols.module_for_path(rel_path) {
            module = name;
            if !owner.is_empty() {
                plugin = owner;
            }
        }
    }
    (plugin, module)
}

/// File-level facts shared by all chunks of a file.
#[derive(Debug, Clone)]
pub struct FileMeta<'a> {
    pub rel_path: &'a str,
    pub kind: ChunkKind,
    pub mtime: i64,
    pub size: u64,
}

/// Splits file text into line windows.
#[derive(Debug, Clone, Default)]
pub struct LineChunker {
    sizes: ChunkSizes,
}

impl LineChunker {
    pub fn new(sizes: ChunkSizes) -> Self {
        Self { sizes }
    }

    /// Inclusive 1-based line ranges covering `line_count` lines.
    pub fn windows(&self, kind: ChunkKind, line_count: usize) -> Vec<(usize, usize)> {
        let size = self.sizes.for_kind(kind);
        let mut ranges = Vec::new();
        let mut start = 1;
        while start <= line_count {
            let end = (start + size - 1).min(line_count);
            ranges.push((start, end));
            start = end + 1;
        }
        ranges
    }

    /// Chunk a file's text. An empty file yields no chunks.
    pub fn chunk_text(
        &self,
        text: &str,
        meta: &FileMeta<'_>,
        symbols: &dyn SymbolIndex,
    ) -> Vec<Chunk> {
        let lines: Vec<&str> = text.lines().collect();
        let (plugin, module) = infer_plugin_module(meta.rel_path, symbols);

        self.windows(meta.kind, lines.len())
            .into_iter()
            .map(|(start_line, end_line)| {
                let body = lines[start_line - 1..end_line].join("\n");
                Chunk {
                    chunk_id: chunk_id(meta.rel_path, start_line, end_line),
                    path: meta.rel_path.to_string(),
                    plugin: plugin.clone(),
                    module: module.clone(),
                    kind: meta.kind,
                    start_line,
                    end_line,
                    content_hash: sha256_hex(body.as_bytes()),
                    text: body,
                    symbol_hits: symbols.symbols_in_range(meta.rel_path, start_line, end_line),
                    tag_hits: symbols.tags_in_range(meta.rel_path, start_line, end_line),
                    mtime: meta.mtime,
                    size: meta.size,
                }
            })
            .collect()
    }
}

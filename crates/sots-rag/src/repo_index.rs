//! Lookup into an externally produced symbol/tag index.
//!
//! The indexer and query use it for exact-match short-circuits and to tag
//! chunks with the symbols and tags they contain. When the index is absent
//! everything degrades to empty results.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Directory, relative to the project root, holding the external index.
pub const REPO_INDEX_SUBDIR: &str = "Reports/RepoIndex";

const SYMBOL_MAP_FILE: &str = "symbol_map.json";
const TAG_USAGE_FILE: &str = "tag_usage.json";
const MODULE_GRAPH_FILE: &str = "module_graph.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Symbol,
    Tag,
}

/// A symbol or tag whose name occurs in the query text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExactMatch {
    pub kind: MatchKind,
    pub term: String,
    pub path: String,
    pub line: Option<usize>,
    pub module: Option<String>,
    pub plugin: Option<String>,
}

/// Read-only view of a symbol/tag index.
pub trait SymbolIndex {
    fn is_available(&self) -> bool;

    /// Symbols and tags whose name appears (case-insensitively) in `query`.
    fn exact_matches(&self, query: &str) -> Vec<ExactMatch>;

    /// Sorted, de-duplicated symbol names declared within the line range.
    fn symbols_in_range(&self, rel_path: &str, start: usize, end: usize) -> Vec<String>;

    /// Sorted, de-duplicated tags used within the line range.
    fn tags_in_range(&self, rel_path: &str, start: usize, end: usize) -> Vec<String>;

    /// `(module, plugin)` for a path that names a known module.
    fn module_for_path(&self, rel_path: &str) -> Option<(String, String)>;
}

/// The absent index.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSymbolIndex;

impl SymbolIndex for NoSymbolIndex {
    fn is_available(&self) -> bool {
        false
    }

    fn exact_matches(&self, _query: &str) -> Vec<ExactMatch> {
        Vec::new()
    }

    fn symbols_in_range(&self, _rel_path: &str, _start: usize, _end: usize) -> Vec<String> {
        Vec::new()
    }

    fn tags_in_range(&self, _rel_path: &str, _start: usize, _end: usize) -> Vec<String> {
        Vec::new()
    }

    fn module_for_path(&self, _rel_path: &str) -> Option<(String, String)> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct SymbolEntry {
    name: Option<String>,
    header: Option<String>,
    source: Option<String>,
    line: Option<usize>,
    module: Option<String>,
    plugin: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TagUsage {
    #[serde(default)]
    tags: BTreeMap<String, Vec<TagOccurrence>>,
}

#[derive(Debug, Clone, Deserialize)]
struct TagOccurrence {
    file: Option<String>,
    line: Option<usize>,
    module: Option<String>,
    plugin: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ModuleGraph {
    #[serde(default)]
    modules: Vec<ModuleEntry>,
}

#[derive(Debug, Deserialize)]
struct ModuleEntry {
    name: Option<String>,
    plugin: Option<String>,
}

#[derive(Debug, Clone)]
struct Located {
    name: String,
    line: Option<usize>,
    module: Option<String>,
    plugin: Option<String>,
}

/// [`SymbolIndex`] backed by the JSON files under `Reports/RepoIndex`.
#[derive(Debug, Clone, Default)]
pub struct RepoIndexBridge {
    dir: PathBuf,
    loaded: bool,
    symbols_by_name: BTreeMap<String, Vec<(String, Located)>>,
    symbols_by_file: BTreeMap<String, Vec<Located>>,
    tags_by_file: BTreeMap<String, Vec<Located>>,
    module_to_plugin: BTreeMap<String, String>,
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

fn in_range(line: Option<usize>, start: usize, end: usize) -> bool {
    line.is_some_and(|l| start <= l && l <= end)
}

impl RepoIndexBridge {
    /// Load the index for `project_root`. Missing or malformed files yield
    /// empty data.
    pub fn load(project_root: &Path) -> Self {
        let mut bridge = Self {
            dir: project_root.join(REPO_INDEX_SUBDIR),
            ..Self::default()
        };
        if !bridge.dir.join(SYMBOL_MAP_FILE).is_file() {
            debug!(dir = %bridge.dir.display(), "No repo index symbol map");
            return bridge;
        }

        let symbols: Vec<SymbolEntry> = bridge.read_json(SYMBOL_MAP_FILE).unwrap_or_default();
        let tags: TagUsage = bridge.read_json(TAG_USAGE_FILE).unwrap_or_default();
        let modules: ModuleGraph = bridge.read_json(MODULE_GRAPH_FILE).unwrap_or_default();

        for entry in symbols {
            let Some(name) = entry.name.filter(|n| !n.is_empty()) else {
                continue;
            };
            let located = Located {
                name: name.clone(),
                line: entry.line,
                module: entry.module,
                plugin: entry.plugin,
            };
            let primary = entry.header.as_deref().or(entry.source.as_deref());
            for file in [entry.header.as_deref(), entry.source.as_deref()]
                .into_iter()
                .flatten()
            {
                bridge
                    .symbols_by_file
                    .entry(normalize(file))
                    .or_default()
                    .push(located.clone());
            }
            bridge
                .symbols_by_name
                .entry(name)
                .or_default()
                .push((primary.map(normalize).unwrap_or_default(), located));
        }

        for (tag, occurrences) in tags.tags {
            for occ in occurrences {
                let Some(file) = occ.file else { continue };
                bridge
                    .tags_by_file
                    .entry(normalize(&file))
                    .or_default()
                    .push(Located {
                        name: tag.clone(),
                        line: occ.line,
                        module: occ.module,
                        plugin: occ.plugin,
                    });
            }
        }

        for module in modules.modules {
            if let (Some(name), Some(plugin)) = (module.name, module.plugin) {
                if !name.is_empty() && !plugin.is_empty() {
                    bridge.module_to_plugin.insert(name, plugin);
                }
            }
        }

        bridge.loaded = true;
        debug!(
            symbols = bridge.symbols_by_name.len(),
            tagged_files = bridge.tags_by_file.len(),
            modules = bridge.module_to_plugin.len(),
            "Loaded repo index"
        );
        bridge
    }

    fn read_json<T: DeserializeOwned>(&self, file: &str) -> Option<T> {
        let path = self.dir.join(file);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %path.display(), "Ignoring malformed repo index file: {}", e);
                None
            }
        }
    }

    fn exact_symbol_matches(&self, query_lower: &str) -> Vec<ExactMatch> {
        self.symbols_by_name
            .iter()
            .filter(|(name, _)| query_lower.contains(&name.to_lowercase()))
            .flat_map(|(_, entries)| entries.iter())
            .map(|(path, located)| ExactMatch {
                kind: MatchKind::Symbol,
                term: located.name.clone(),
                path: path.clone(),
                line: located.line,
                module: located.module.clone(),
                plugin: located.plugin.clone(),
            })
            .collect()
    }

    fn exact_tag_matches(&self, query_lower: &str) -> Vec<ExactMatch> {
        let mut seen = BTreeSet::new();
        let mut matches = Vec::new();
        for (file, occurrences) in &self.tags_by_file {
            for occ in occurrences {
                if seen.contains(&occ.name) || !query_lower.contains(&occ.name.to_lowercase()) {
                    continue;
                }
                seen.insert(occ.name.clone());
                matches.push(ExactMatch {
                    kind: MatchKind::Tag,
                    term: occ.name.clone(),
                    path: file.clone(),
                    line: occ.line,
                    module: occ.module.clone(),
                    plugin: occ.plugin.clone(),
                });
            }
        }
        matches
    }

    fn names_in_range(
        map: &BTreeMap<String, Vec<Located>>,
        rel_path: &str,
        start: usize,
        end: usize,
    ) -> Vec<String> {
        let names: BTreeSet<&str> = map
            .get(rel_path)
            .into_iter()
            .flatten()
            .filter(|l| in_range(l.line, start, end))
            .map(|l| l.name.as_str())
            .collect();
        names.into_iter().map(str::to_string).collect()
    }
}

impl SymbolIndex for RepoIndexBridge {
    fn is_available(&self) -> bool {
        self.loaded
    }

    fn exact_matches(&self, query: &str) -> Vec<ExactMatch> {
        if !self.loaded {
            return Vec::new();
        }
        let query_lower = query.to_lowercase();
        let mut matches = self.exact_symbol_matches(&query_lower);
        matches.extend(self.exact_tag_matches(&query_lower));
        matches
    }

    fn symbols_in_range(&self, rel_path: &str, start: usize, end: usize) -> Vec<String> {
        Self::names_in_range(&self.symbols_by_file, rel_path, start, end)
    }

    fn tags_in_range(&self, rel_path: &str, start: usize, end: usize) -> Vec<String> {
        Self::names_in_range(&self.tags_by_file, rel_path, start, end)
    }

    fn module_for_path(&self, rel_path: &str) -> Option<(String, String)> {
        let path = normalize(rel_path);
        self.module_to_plugin
            .iter()
            .find(|(module, _)| path.contains(module.as_str()))
            .map(|(module, plugin)| (module.clone(), plugin.clone()))
    }
}

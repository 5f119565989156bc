use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sots_rag::report::{render_diff_json, render_diff_text};
use sots_rag::storage::write_atomic;
use sots_rag::{IndexManifest, ManifestDiff, MANIFEST_FILE};

use crate::DiffArgs;

/// Manifest inside a snapshot: the path itself, `<dir>/rag_manifest.json`
/// or `<dir>/RAG/rag_manifest.json`.
pub fn resolve_manifest(path: &Path) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    [path.join(MANIFEST_FILE), path.join("RAG").join(MANIFEST_FILE)]
        .into_iter()
        .find(|candidate| candidate.is_file())
        .with_context(|| format!("No {} found under {}", MANIFEST_FILE, path.display()))
}

fn snapshot_dir(path: &Path) -> &Path {
    if path.is_file() {
        path.parent().unwrap_or(path)
    } else {
        path
    }
}

fn snapshot_name(path: &Path) -> String {
    snapshot_dir(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string())
}

pub fn run(args: &DiffArgs) -> Result<()> {
    let old_manifest = resolve_manifest(&args.old)?;
    let new_manifest = resolve_manifest(&args.new)?;
    let old = IndexManifest::load(&old_manifest)
        .with_context(|| format!("Failed to read {}", old_manifest.display()))?;
    let new = IndexManifest::load(&new_manifest)
        .with_context(|| format!("Failed to read {}", new_manifest.display()))?;

    let diff = ManifestDiff::between(&old, &new);
    let stem = format!("diff_from_{}", snapshot_name(&args.old));
    let out_dir = snapshot_dir(&args.new);
    let txt_path = args
        .out
        .clone()
        .unwrap_or_else(|| out_dir.join(format!("{}.txt", stem)));
    let json_path = args
        .json
        .clone()
        .unwrap_or_else(|| out_dir.join(format!("{}.json", stem)));

    let text = render_diff_text(&args.old, &args.new, &diff);
    write_atomic(&txt_path, text.as_bytes())?;
    write_atomic(&json_path, render_diff_json(&diff)?.as_bytes())?;

    println!("{}", text);
    println!("Text: {}", txt_path.display());
    println!("JSON: {}", json_path.display());
    Ok(())
}

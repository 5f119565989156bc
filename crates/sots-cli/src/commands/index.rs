use anyhow::{Context, Result};
use sots_rag::report::render_index_report;
use sots_rag::RagIndexer;
use tracing::info;

use crate::settings::Settings;
use crate::IndexArgs;

pub fn run(args: &IndexArgs) -> Result<()> {
    let settings = Settings::resolve(&args.common)?;
    if !settings.project_root.is_dir() {
        anyhow::bail!(
            "Project root {} is not a directory",
            settings.project_root.display()
        );
    }

    let config = settings.indexer_config(args);
    let provider = settings.embedding_provider()?;
    let mut indexer = RagIndexer::new(config, provider);
    let stats = indexer.run().context("Index run failed")?;

    info!(
        files = stats.files_scanned,
        chunks = stats.chunks_total,
        "Index written to {}",
        indexer.paths().dir.display()
    );
    println!("{}", render_index_report(indexer.config(), &stats));
    println!();
    println!("Report: {}", indexer.paths().report.display());
    println!("Run log: {}", indexer.paths().run_log.display());
    Ok(())
}

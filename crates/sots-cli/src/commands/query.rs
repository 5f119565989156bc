use anyhow::{Context, Result};
use sots_rag::report::{render_query_text, write_query_outputs};
use sots_rag::RagQuery;

use crate::settings::Settings;
use crate::QueryArgs;

pub fn run(args: &QueryArgs) -> Result<()> {
    let text = args.query_text();
    if text.is_empty() {
        anyhow::bail!("No query given; pass --q TEXT or the query as arguments");
    }

    let settings = Settings::resolve(&args.common)?;
    let provider = settings.embedding_provider()?;
    let rag = RagQuery::open(&settings.project_root, &settings.reports_dir, provider)
        .context("Failed to open index")?
        .with_reranker(Box::new(settings.reranker()));
    if rag.is_empty() {
        tracing::warn!(
            "Index at {} is empty; run `sots index` first",
            settings.reports_dir.display()
        );
    }

    let report = rag.run(&text, &settings.query_config(args))?;
    let outputs = write_query_outputs(rag.paths(), &report).context("Failed to write query outputs")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", render_query_text(&report));
        println!();
        println!("JSON: {}", outputs.json.display());
        println!("Text: {}", outputs.txt.display());
        println!("Log: {}", outputs.log.display());
    }
    Ok(())
}

//! `sots` command line: build, query and compare retrieval indexes.
//!
//! ```bash
//! sots index --project-root ~/Projects/SOTS
//! sots query "inventory save slot" --top-k 5 --rerank
//! sots diff --old Snapshots/2024-05-01 --new Reports/RAG
//! ```

pub mod commands;
pub mod settings;

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sots", version, about = "Retrieval index over the SOTS project tree")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build or incrementally update the index
    Index(IndexArgs),
    /// Answer one query against the index
    Query(QueryArgs),
    /// Compare two index manifests
    Diff(DiffArgs),
    /// Print the effective configuration as TOML
    Config(CommonArgs),
}

/// Flags shared by every command that touches an index.
#[derive(Debug, Clone, Default, Args)]
pub struct CommonArgs {
    /// Project root (default: configured, else detected from the working directory)
    #[arg(long)]
    pub project_root: Option<PathBuf>,

    /// Artifact directory (default: <project_root>/Reports/RAG)
    #[arg(long)]
    pub reports_dir: Option<PathBuf>,

    /// Configuration file (default: ./sots_rag.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Embedding backend: remote or hash
    #[arg(long)]
    pub embedding_backend: Option<String>,

    /// Model name for the remote backend
    #[arg(long)]
    pub embedding_model: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct IndexArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Discard existing artifacts and reindex everything
    #[arg(long)]
    pub full: bool,

    #[arg(long, action = ArgAction::Set, value_name = "BOOL")]
    pub include_docs: Option<bool>,

    #[arg(long, action = ArgAction::Set, value_name = "BOOL")]
    pub include_code: Option<bool>,

    /// Comma separated plugin name globs, e.g. "SOTS_*,Inv*"
    #[arg(long, value_name = "GLOBS")]
    pub plugin_filter: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct QueryArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Query text
    #[arg(long = "q", value_name = "TEXT", conflicts_with = "text")]
    pub q: Option<String>,

    /// Query text as positional words
    pub text: Vec<String>,

    #[arg(long)]
    pub top_k: Option<usize>,

    #[arg(long)]
    pub bm25_n: Option<usize>,

    #[arg(long)]
    pub vec_n: Option<usize>,

    /// Apply the heuristic reranker to the top candidates
    #[arg(long)]
    pub rerank: bool,

    #[arg(long)]
    pub rerank_k: Option<usize>,

    /// Print the JSON report instead of the text summary
    #[arg(long)]
    pub json: bool,
}

impl QueryArgs {
    pub fn query_text(&self) -> String {
        match &self.q {
            Some(q) => q.trim().to_string(),
            None => self.text.join(" ").trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct DiffArgs {
    /// Older snapshot directory or manifest file
    #[arg(long)]
    pub old: PathBuf,

    /// Newer snapshot directory or manifest file
    #[arg(long)]
    pub new: PathBuf,

    /// Text output (default: <new>/diff_from_<old name>.txt)
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// JSON output (default: <new>/diff_from_<old name>.json)
    #[arg(long)]
    pub json: Option<PathBuf>,
}

/// Initialise the global subscriber. `RUST_LOG` wins unless `-v` is given.
pub fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    // A subscriber may already be installed when embedded in tests.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Parse the process arguments and run the selected command.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    execute(cli)
}

pub fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Index(args) => commands::index::run(&args),
        Command::Query(args) => commands::query::run(&args),
        Command::Diff(args) => commands::diff::run(&args),
        Command::Config(args) => commands::show_config(&args),
    }
}

//! Command-line arguments

use caredex_config::ProviderKind;
use caredex_embeddings::TaskHint;
use caredex_store::EntityKind;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uuid::Uuid;

/// Caredex embedding pipeline for the healthcare directory
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Optional configuration file (TOML, or YAML by extension)
    #[arg(long, short = 'c', global = true, env = "CAREDEX_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Log filter, overrides `telemetry.log_level`
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate embeddings for ad-hoc texts
    Embed(EmbedArgs),
    /// Embed directory entities and store the vectors
    Index(IndexArgs),
    /// Search hospitals and doctors
    Search(SearchArgs),
    /// Show daily and monthly spend against the ceilings
    Budget,
    /// Print the effective configuration (credentials omitted)
    Config,
}

#[derive(clap::Args, Debug)]
pub struct EmbedArgs {
    /// Texts to embed; more than one is sent as a batch
    #[arg(required = true)]
    pub texts: Vec<String>,

    /// Output width (defaults to `embedding.default_dimensions`)
    #[arg(long, short = 'd')]
    pub dimensions: Option<usize>,

    /// Use this provider instead of the configured primary
    #[arg(long)]
    pub provider: Option<ProviderKind>,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long, value_enum, default_value_t = TaskArg::Document)]
    pub task: TaskArg,

    /// Title forwarded with document embeddings
    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub no_cache: bool,

    #[arg(long)]
    pub no_fallback: bool,

    /// Include the full vectors in the output
    #[arg(long)]
    pub full: bool,
}

#[derive(clap::Args, Debug)]
pub struct IndexArgs {
    /// Reprocess entities that already have embeddings
    #[arg(long)]
    pub force: bool,

    /// Only these entity ids (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub ids: Vec<Uuid>,

    /// Restrict to one or more kinds (hospital, doctor)
    #[arg(long = "kind")]
    pub kinds: Vec<EntityKind>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub concurrency: Option<usize>,

    #[arg(long, short = 'd')]
    pub dimensions: Option<usize>,
}

#[derive(clap::Args, Debug)]
pub struct SearchArgs {
    /// Free-text query
    pub query: String,

    /// City or state to filter on
    #[arg(long)]
    pub location: Option<String>,

    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    #[arg(long = "kind")]
    pub kinds: Vec<EntityKind>,

    /// Structured filters as key=value
    #[arg(long = "filter", short = 'f', value_parser = parse_filter)]
    pub filters: Vec<(String, String)>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskArg {
    Document,
    Query,
    Similarity,
}

impl From<TaskArg> for TaskHint {
    fn from(task: TaskArg) -> Self {
        match task {
            TaskArg::Document => Self::Document,
            TaskArg::Query => Self::Query,
            TaskArg::Similarity => Self::Similarity,
        }
    }
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("filter key is empty in '{raw}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

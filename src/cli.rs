use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::cost::DEFAULT_MODEL;
use crate::types::Region;

#[derive(Debug, Parser)]
#[command(name = "ticket-extractor", version, about = "Extract invoice entities from support ticket attachments")]
pub struct Cli {
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Convert ticket attachments to text and extract invoice entities.
    Extract(RunArgs),
    /// Predict each ticket's subcategory from its description.
    Classify(RunArgs),
}

impl Command {
    pub fn args(&self) -> &RunArgs {
        match self {
            Command::Extract(args) | Command::Classify(args) => args,
        }
    }
}

fn parse_date(raw: &str) -> Result<String, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Range start (inclusive), YYYY-MM-DD.
    #[arg(value_parser = parse_date)]
    pub start_date: String,
    /// Range end (exclusive), YYYY-MM-DD.
    #[arg(value_parser = parse_date)]
    pub end_date: String,

    /// Only process tickets from these regions, e.g. `--regions APAC EMEA`.
    #[arg(long, num_args = 1.., value_enum)]
    pub regions: Option<Vec<Region>>,

    /// KEY=VALUE file with the API credentials.
    #[arg(long, default_value = "data/inputs/secrets/secrets.txt")]
    pub path_to_env_var: PathBuf,

    /// System prompt file; defaults depend on the subcommand.
    #[arg(long)]
    pub path_to_system_prompt: Option<PathBuf>,

    /// Parent folder of the timestamped run folder.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    /// Re-run only the tickets that failed in this run id.
    #[arg(long)]
    pub retry_failed: Option<i64>,

    /// Pricing used for the cost column.
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub cost_model: String,

    #[arg(long, default_value = "data/outputs/run_history.db")]
    pub history_db: PathBuf,
}

pub mod cli;
pub mod commands;
pub mod config;
pub mod convert;
pub mod cost;
pub mod db;
pub mod error;
pub mod excel;
pub mod json;
pub mod language;
pub mod llm;
pub mod logging;
pub mod models;
pub mod ocr;
pub mod postprocess;
pub mod script;
pub mod services;
pub mod snow;
pub mod types;

use anyhow::Context;
use std::fs;
use std::path::PathBuf;
use tracing::info;

use cli::{Cli, Command};
use commands::{RunOptions, RunSummary};
use config::AppConfig;
use convert::Converter;
use db::Db;
use llm::{AzureOpenAiClient, EntityExtractor, SubcategoryClassifier};
use snow::SnowClient;

const EXTRACT_PROMPT: &str = "data/inputs/system_prompts/default_system_prompt_v6.txt";
const CLASSIFY_PROMPT: &str = "data/inputs/system_prompts/subcategory_classifier_v2.txt";
const EXTRACT_OUTPUT: &str = "data/outputs/entity_extraction";
const CLASSIFY_OUTPUT: &str = "data/outputs/ticket_classification";

/// Load configuration and the run history, build the clients and run the
/// requested subcommand.
pub fn run(cli: Cli) -> anyhow::Result<RunSummary> {
    let (default_prompt, default_output) = match cli.command {
        Command::Extract(_) => (EXTRACT_PROMPT, EXTRACT_OUTPUT),
        Command::Classify(_) => (CLASSIFY_PROMPT, CLASSIFY_OUTPUT),
    };
    let args = cli.command.args();

    let config = AppConfig::load(&args.path_to_env_var)?;
    let prompt_path = args
        .path_to_system_prompt
        .clone()
        .unwrap_or_else(|| PathBuf::from(default_prompt));
    let system_prompt = fs::read_to_string(&prompt_path)
        .with_context(|| format!("could not read system prompt {}", prompt_path.display()))?;
    let db = Db::new(args.history_db.clone())
        .with_context(|| format!("could not open run history {}", args.history_db.display()))?;

    let options = RunOptions {
        start_date: args.start_date.clone(),
        end_date: args.end_date.clone(),
        regions: args.regions.clone(),
        output_dir: args
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(default_output)),
        workers: args.workers,
        retry_failed: args.retry_failed,
        cost_model: args.cost_model.clone(),
    };

    let source = SnowClient::new(&config.snow, config.http_timeout)?;
    let model = AzureOpenAiClient::new(&config.azure, config.http_timeout)?;

    let summary = match &cli.command {
        Command::Extract(_) => {
            let converter = Converter::from_config(&config.ocr);
            let extractor = EntityExtractor::new(model, system_prompt);
            commands::run_entity_extraction(&source, &converter, &extractor, &db, &options)?
        }
        Command::Classify(_) => {
            let classifier = SubcategoryClassifier::new(model, system_prompt);
            commands::run_classification(&source, &classifier, &db, &options)?
        }
    };
    info!(
        run_id = summary.run_id,
        tickets = summary.tickets,
        failed = summary.failed,
        run_dir = %summary.run_dir.display(),
        "run finished"
    );
    Ok(summary)
}

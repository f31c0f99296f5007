//! The two batch runs: entity extraction and subcategory classification.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use crate::convert::Converter;
use crate::cost::{pricing_for, Pricing};
use crate::db::Db;
use crate::error::{LlmError, RunError, SnowError};
use crate::excel::write_metrics_workbook;
use crate::json::to_pretty_json;
use crate::llm::{build_llm_input, ChatModel, Completion, EntityExtractor, SubcategoryClassifier};
use crate::models::{
    ClassificationMetrics, FailureReason, RunParameters, SheetRow, TicketMetrics, TicketOutcome,
};
use crate::ocr::OcrEngine;
use crate::postprocess::post_process;
use crate::snow::{
    filter_by_region, sanitize_filename, TicketSource, TICKET_ENTITIES_FILE, TICKET_LOG_FILE,
};
use crate::types::{Region, StoredAttachment, Ticket};

pub const RATE_LIMIT_MARKER: &str = "**ERROR: Token rate limit exceded**\n\n";
const PROGRESS_EVERY: usize = 5;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub start_date: String,
    pub end_date: String,
    pub regions: Option<Vec<Region>>,
    pub output_dir: PathBuf,
    /// Tickets processed concurrently; 1 keeps the run sequential.
    pub workers: usize,
    /// Only re-run the tickets that failed in this earlier run.
    pub retry_failed: Option<i64>,
    pub cost_model: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: i64,
    pub run_dir: PathBuf,
    pub tickets: usize,
    pub failed: usize,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> RunError + '_ {
    move |source| RunError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), RunError> {
    fs::write(path, contents).map_err(io_err(path))
}

/// Run `f` over `items`, at most `workers` at a time, keeping input order.
fn process_in_chunks<T, R, F>(items: &[T], workers: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> R + Sync,
{
    let workers = workers.max(1);
    let mut results = Vec::with_capacity(items.len());
    for (chunk_idx, chunk) in items.chunks(workers).enumerate() {
        let offset = chunk_idx * workers;
        if chunk.len() == 1 {
            results.push(f(offset, &chunk[0]));
            continue;
        }
        let f = &f;
        std::thread::scope(|s| {
            let handles: Vec<_> = chunk
                .iter()
                .enumerate()
                .map(|(i, item)| s.spawn(move || f(offset + i, item)))
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(r) => results.push(r),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
        });
    }
    results
}

/// Fetch the date range, then narrow by region and by an earlier run's failures.
fn select_tickets<S: TicketSource>(
    source: &S,
    db: &Db,
    options: &RunOptions,
) -> Result<Vec<Ticket>, RunError> {
    let mut tickets = source.fetch_tickets(&options.start_date, &options.end_date)?;
    info!(
        count = tickets.len(),
        start = %options.start_date,
        end = %options.end_date,
        "collected tickets across all markets"
    );
    if let Some(regions) = &options.regions {
        tickets = filter_by_region(tickets, regions);
        let names: Vec<&str> = regions.iter().map(|r| r.short_name()).collect();
        info!(count = tickets.len(), regions = ?names, "filtered tickets by region");
    }
    if let Some(run_id) = options.retry_failed {
        if !db.run_exists(run_id)? {
            return Err(RunError::UnknownRun(run_id));
        }
        let failed: HashSet<String> = db.failed_tickets(run_id)?.into_iter().collect();
        tickets.retain(|t| failed.contains(&t.number));
        info!(count = tickets.len(), run_id, "retrying failed tickets");
    }
    Ok(tickets)
}

fn create_run_dir(output_dir: &Path) -> Result<(String, PathBuf), RunError> {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let run_dir = output_dir.join(format!("{timestamp}_run"));
    fs::create_dir_all(&run_dir).map_err(io_err(&run_dir))?;
    Ok((timestamp, run_dir))
}

fn ticket_dir(run_dir: &Path, ticket: &Ticket) -> Result<PathBuf, RunError> {
    let mut name = sanitize_filename(&ticket.number);
    if name.is_empty() {
        name = sanitize_filename(&ticket.sys_id);
    }
    let dir = run_dir.join(name);
    fs::create_dir_all(&dir).map_err(io_err(&dir))?;
    Ok(dir)
}

/// Write every file even if an earlier one fails; report the first failure.
fn write_ticket_files(dir: &Path, files: &[(&str, &str)]) -> Result<(), RunError> {
    let mut first_err = None;
    for (name, contents) in files {
        if let Err(e) = write_file(&dir.join(name), contents) {
            warn!(error = %e, "ticket artifact could not be written");
            first_err.get_or_insert(e);
        }
    }
    first_err.map_or(Ok(()), Err)
}

fn write_run_artifacts<R: SheetRow>(
    run_dir: &Path,
    timestamp: &str,
    rows: &[R],
    options: &RunOptions,
) -> Result<(), RunError> {
    let metrics_path = run_dir.join(format!("metrics_{timestamp}.xlsx"));
    write_metrics_workbook(&metrics_path, "metrics", rows)?;

    let params = RunParameters {
        regions: options
            .regions
            .as_ref()
            .map(|rs| rs.iter().map(|r| r.short_name().to_string()).collect()),
        start_date: options.start_date.clone(),
        end_date: options.end_date.clone(),
    };
    let params_path = run_dir.join(format!("parameters_{timestamp}.json"));
    write_file(&params_path, &to_pretty_json(&params)?)?;
    info!(metrics = %metrics_path.display(), "run artifacts written");
    Ok(())
}

fn download_attachments<S: TicketSource>(
    source: &S,
    ticket: &Ticket,
    dir: &Path,
) -> Result<Vec<StoredAttachment>, SnowError> {
    source
        .fetch_attachment_manifest(&ticket.sys_id)?
        .iter()
        .map(|attachment| source.download_attachment(attachment, dir))
        .collect()
}

struct ProcessedTicket<M> {
    metrics: M,
    failure: Option<FailureReason>,
}

/// LLM answer turned into a ticket outcome. Truncated answers are still
/// post-processed since the partial text occasionally parses.
fn outcome_from_llm(
    answer: Result<Completion, LlmError>,
    canonical: &str,
) -> (String, u64, u64, TicketOutcome) {
    let (raw, input_tokens, output_tokens) = match answer {
        Ok(c) => (c.text, c.input_tokens, c.output_tokens),
        Err(LlmError::Truncated {
            partial,
            input_tokens,
            output_tokens,
        }) => {
            warn!(output_tokens, "LLM output truncated");
            (partial, input_tokens, output_tokens)
        }
        Err(e) => {
            return (
                String::new(),
                0,
                0,
                TicketOutcome::Failed(FailureReason::Llm(e.to_string())),
            )
        }
    };
    let outcome = match post_process(&raw, canonical) {
        Ok(cleaned) => TicketOutcome::Extracted { cleaned },
        Err(e) => TicketOutcome::Failed(FailureReason::MalformedOutput(e.to_string())),
    };
    (raw, input_tokens, output_tokens, outcome)
}

fn extract_ticket<S, E, M>(
    source: &S,
    converter: &Converter<E>,
    extractor: &EntityExtractor<M>,
    run_dir: &Path,
    pricing: Pricing,
    ticket: &Ticket,
) -> ProcessedTicket<TicketMetrics>
where
    S: TicketSource,
    E: OcrEngine,
    M: ChatModel,
{
    let canonical = ticket.canonical_entity();
    info!(ticket = %ticket.number, entity = %canonical, "processing ticket");
    let dir = match ticket_dir(run_dir, ticket) {
        Ok(dir) => dir,
        Err(e) => {
            warn!(ticket = %ticket.number, error = %e, "ticket folder could not be created");
            return ProcessedTicket {
                metrics: TicketMetrics {
                    ticket: ticket.number.clone(),
                    input_tokens: 0,
                    output_tokens: 0,
                    time_to_ticket_to_text: 0.0,
                    time_to_extract_entities: 0.0,
                    cost: 0.0,
                    error: true,
                },
                failure: Some(FailureReason::Artifacts(e.to_string())),
            };
        }
    };

    let started = Instant::now();
    let attachments = download_attachments(source, ticket, &dir);
    let (llm_input, attachment_failure) = match attachments {
        Ok(list) => (
            build_llm_input(&ticket.llm_description(), &ticket.vendor_code, &converter.aggregate(&list)),
            None,
        ),
        Err(e) => {
            warn!(ticket = %ticket.number, error = %e, "attachments could not be fetched");
            (
                build_llm_input(&ticket.llm_description(), &ticket.vendor_code, ""),
                Some(FailureReason::Attachments(e.to_string())),
            )
        }
    };
    let time_to_text = started.elapsed().as_secs_f64();
    info!(ticket = %ticket.number, secs = time_to_text, "attachments processed");

    let llm_started = Instant::now();
    let mut log = String::new();
    let (raw, input_tokens, output_tokens, outcome) = match attachment_failure {
        Some(reason) => {
            log.push_str(&format!("**ERROR: attachments could not be fetched: {}**\n\n", reason.detail()));
            (String::new(), 0, 0, TicketOutcome::Failed(reason))
        }
        None => {
            let result = outcome_from_llm(extractor.extract_entities(&llm_input), &canonical);
            if let TicketOutcome::Failed(FailureReason::Llm(e)) = &result.3 {
                warn!(ticket = %ticket.number, error = %e, "entity extraction failed");
                log.push_str(RATE_LIMIT_MARKER);
            }
            result
        }
    };
    let time_to_extract = llm_started.elapsed().as_secs_f64();
    let cost = pricing.cost(input_tokens, output_tokens);
    info!(ticket = %ticket.number, secs = time_to_extract, error = outcome.is_error(), "entities extracted");

    log.push_str(&format!(
        "LLM_INPUT:\n{llm_input}TICKET ENTITY:\n{canonical}\n\nLLM_OUTPUT\n{raw}\n\nLLM_OUTPUT + ENTITY\n{}",
        outcome.result_text()
    ));
    log.push_str(&format!("\n\nINPUT_TOKENS:{input_tokens}\nOUTPUT_TOKENS:{output_tokens}"));
    log.push_str(&format!(
        "\n\nTIME TO PROCESS TICKET: {time_to_text}\nTIME TO EXTRACT ENTITIES: {time_to_extract}\n"
    ));
    log.push_str(&format!("\n\nCOSTS: [{cost}]"));
    let written = write_ticket_files(
        &dir,
        &[(TICKET_LOG_FILE, log.as_str()), (TICKET_ENTITIES_FILE, outcome.result_text())],
    );

    let failure = match outcome {
        TicketOutcome::Failed(reason) => Some(reason),
        TicketOutcome::Extracted { .. } => None,
    }
    .or_else(|| written.err().map(|e| FailureReason::Artifacts(e.to_string())));
    ProcessedTicket {
        metrics: TicketMetrics {
            ticket: ticket.number.clone(),
            input_tokens,
            output_tokens,
            time_to_ticket_to_text: time_to_text,
            time_to_extract_entities: time_to_extract,
            cost,
            error: failure.is_some(),
        },
        failure,
    }
}

/// Record every outcome, then keep the metrics in submission order.
fn collect_results<M>(
    db: &Db,
    run_id: i64,
    tickets: &[Ticket],
    results: Vec<ProcessedTicket<M>>,
) -> Result<(Vec<M>, usize), RunError> {
    let mut rows = Vec::with_capacity(results.len());
    let mut failed = 0;
    for (ticket, processed) in tickets.iter().zip(results) {
        db.record_ticket(run_id, &ticket.number, processed.failure.as_ref())?;
        if processed.failure.is_some() {
            failed += 1;
        }
        rows.push(processed.metrics);
    }
    Ok((rows, failed))
}

/// Download, convert and extract entities for every selected ticket.
pub fn run_entity_extraction<S, E, M>(
    source: &S,
    converter: &Converter<E>,
    extractor: &EntityExtractor<M>,
    db: &Db,
    options: &RunOptions,
) -> Result<RunSummary, RunError>
where
    S: TicketSource + Sync,
    E: OcrEngine + Sync,
    M: ChatModel + Sync,
{
    let pricing = pricing_for(&options.cost_model)?;
    let (timestamp, run_dir) = create_run_dir(&options.output_dir)?;
    let tickets = select_tickets(source, db, options)?;
    let run_id = db.start_run(
        "extract",
        &run_dir.display().to_string(),
        &options.start_date,
        &options.end_date,
    )?;
    info!(run_id, count = tickets.len(), "starting entity extraction");

    let results = process_in_chunks(&tickets, options.workers, |i, ticket| {
        let result = extract_ticket(source, converter, extractor, &run_dir, pricing, ticket);
        if i % PROGRESS_EVERY == 0 {
            info!("{} tickets processed", i + 1);
        }
        result
    });
    let (rows, failed) = collect_results(db, run_id, &tickets, results)?;
    write_run_artifacts(&run_dir, &timestamp, &rows, options)?;

    Ok(RunSummary {
        run_id,
        run_dir,
        tickets: rows.len(),
        failed,
    })
}

fn classify_ticket<M: ChatModel>(
    classifier: &SubcategoryClassifier<M>,
    run_dir: &Path,
    pricing: Pricing,
    ticket: &Ticket,
) -> ProcessedTicket<ClassificationMetrics> {
    info!(ticket = %ticket.number, selected = %ticket.subcategory, "processing ticket");
    let description = ticket.llm_description();

    let started = Instant::now();
    let (assigned, input_tokens, output_tokens, failure) =
        match classifier.get_subcategory(&description, true) {
            Ok(c) => (c.text, c.input_tokens, c.output_tokens, None),
            Err(e) => {
                warn!(ticket = %ticket.number, error = %e, "classification failed");
                (String::new(), 0, 0, Some(FailureReason::Llm(e.to_string())))
            }
        };
    let elapsed = (started.elapsed().as_secs_f64() * 100.0).round() / 100.0;
    let cost = pricing.cost(input_tokens, output_tokens);
    info!(ticket = %ticket.number, assigned = %assigned, "predicted subcategory");

    let mut log = String::new();
    if failure.is_some() {
        log.push_str(RATE_LIMIT_MARKER);
    }
    log.push_str(&format!(
        "SYSTEM PROMPT: {}\nDESCRIPTION: {description}\n\n",
        classifier.system_prompt()
    ));
    log.push_str(&format!(
        "ASSIGNED SUBCATEGORY: {assigned}\nSELECTED SUBCATEGORY: {}\n\nINPUT TOKENS: {input_tokens}\nOUTPUT TOKENS: {output_tokens}\nTIME: {elapsed:.2} seconds\nCOSTS: [{cost}]\n",
        ticket.subcategory
    ));
    let written = ticket_dir(run_dir, ticket).and_then(|dir| write_file(&dir.join(TICKET_LOG_FILE), &log));
    if let Err(e) = &written {
        warn!(ticket = %ticket.number, error = %e, "classification log could not be written");
    }
    let failure = failure.or_else(|| written.err().map(|e| FailureReason::Artifacts(e.to_string())));

    ProcessedTicket {
        metrics: ClassificationMetrics {
            ticket: ticket.number.clone(),
            input_tokens,
            output_tokens,
            cost,
            time_to_get_subcategory: elapsed,
            description,
            assigned_subcategory: assigned,
            selected_subcategory: ticket.subcategory.clone(),
            error: failure.is_some(),
        },
        failure,
    }
}

/// Ask the LLM for each ticket's subcategory and compare it with the one
/// chosen by the agent.
pub fn run_classification<S, M>(
    source: &S,
    classifier: &SubcategoryClassifier<M>,
    db: &Db,
    options: &RunOptions,
) -> Result<RunSummary, RunError>
where
    S: TicketSource,
    M: ChatModel + Sync,
{
    let pricing = pricing_for(&options.cost_model)?;
    let (timestamp, run_dir) = create_run_dir(&options.output_dir)?;
    let tickets = select_tickets(source, db, options)?;
    let run_id = db.start_run(
        "classify",
        &run_dir.display().to_string(),
        &options.start_date,
        &options.end_date,
    )?;
    info!(run_id, count = tickets.len(), "starting classification");

    let results = process_in_chunks(&tickets, options.workers, |i, ticket| {
        let result = classify_ticket(classifier, &run_dir, pricing, ticket);
        if i % PROGRESS_EVERY == 0 {
            info!("{} tickets processed", i + 1);
        }
        result
    });
    let (rows, failed) = collect_results(db, run_id, &tickets, results)?;
    write_run_artifacts(&run_dir, &timestamp, &rows, options)?;

    Ok(RunSummary {
        run_id,
        run_dir,
        tickets: rows.len(),
        failed,
    })
}

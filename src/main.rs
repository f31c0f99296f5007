use clap::Parser;
use ticket_extractor_lib::cli::Cli;
use ticket_extractor_lib::logging::init_logger;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger(&cli.log_level);
    let summary = ticket_extractor_lib::run(cli)?;
    println!(
        "run {} finished: {} tickets, {} failed, results in {}",
        summary.run_id,
        summary.tickets,
        summary.failed,
        summary.run_dir.display()
    );
    Ok(())
}

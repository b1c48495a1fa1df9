use clap::Parser;
use refolder::cli::{Cli, run_cli};
use refolder::output::OutputFormatter;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Diagnostics go to stderr so they never fight the progress bar.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    if let Err(e) = run_cli(cli) {
        OutputFormatter::error(&e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

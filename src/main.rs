mod backend;
mod cli;
mod consts;
mod corpus;
mod download;
mod error;
mod experiment;
mod metrics;
mod model;
mod output;
mod prompt;
mod runner;
mod tokenizer;

use crate::cli::Cli;
use crate::error::ExperimentError;
use crate::runner::{error_chain, run_experiment_command};
use clap::Parser;
use std::backtrace::{Backtrace, BacktraceStatus};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    if let Err(err) = real_main() {
        error!("Unexpected Error: {}", error_chain(&err).join(": "));
        // Captured only when RUST_BACKTRACE or RUST_LIB_BACKTRACE enables it.
        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            error!("Backtrace:\n{backtrace}");
        }
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn real_main() -> Result<(), ExperimentError> {
    let cli = Cli::parse();
    let outcome = run_experiment_command(&cli)?;
    output::print_summary(&cli.output, &outcome.results_path, &outcome.record)
}

//! Binary crate for the `weather` command-line tool.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - Interactive configuration
//! - Human-friendly output formatting

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use weather_core::WeatherError;

mod cli;
mod output;

#[tokio::main]
async fn main() -> ExitCode {
    let cmd = cli::Cli::parse();
    init_tracing(cmd.verbose);

    match cmd.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so exports piped from stdout stay clean.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn report(err: &anyhow::Error) {
    match err.downcast_ref::<WeatherError>() {
        Some(weather_err) => {
            let message = weather_err.user_message();
            match weather_err.reason() {
                Some(reason) => eprintln!("Error [{}]: {message}", reason.code()),
                None => eprintln!("Error: {message}"),
            }
            eprintln!("  {weather_err}");
        }
        None => eprintln!("Error: {err:#}"),
    }
}

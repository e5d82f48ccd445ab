//! taskforge CLI entry point.
//!
//! Initializes logging, delegates to the CLI module for command handling,
//! and maps the outcome onto the process exit code.

use std::process::ExitCode;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first to get log_level
    let cli = taskforge::cli::parse_cli();

    // Priority: RUST_LOG env var > --log-level CLI arg > default "info"
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());

    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    match taskforge::cli::run_with_cli(cli).await {
        Ok(exit) => ExitCode::from(exit.code()),
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::from(taskforge::cli::exit_for_error(&err).code())
        }
    }
}

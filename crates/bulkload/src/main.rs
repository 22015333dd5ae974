//! bulkload - Main entry point

use bulkload::{commands, Cli, Commands};
use bulkload_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use clap::Parser;
use std::io;
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("bulkload")
        .build();

    // BULKLOAD_LOG_* variables take precedence over the flags
    let log_config = match log_config.clone().merge_env() {
        Ok(merged) => merged,
        Err(e) => {
            eprintln!("Warning: ignoring invalid logging environment: {:#}", e);
            log_config
        }
    };

    let guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {:#}", e);
            None
        }
    };

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        // flush file logs before exiting
        drop(guard);
        process::exit(1);
    }
}

async fn execute_command(cli: &Cli) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();

    match &cli.command {
        Commands::Run { config } => commands::run(config.as_deref(), &mut out).await,
        Commands::Validate { config } => commands::validate(config.as_deref(), &mut out),
        Commands::Statement { config } => commands::statement(config.as_deref(), &mut out),
    }
}

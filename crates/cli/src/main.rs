//! authfetch CLI - authenticated requests with automatic token refresh

mod commands;
mod config;
mod logging;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use commands::Commands;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, Level};

#[derive(Parser)]
#[command(name = "authfetch")]
#[command(about = "Authenticated HTTP requests with single-flight token refresh")]
#[command(version)]
struct Cli {
    /// Set logging level
    #[arg(short = 'l', long, global = true, default_value = "warn")]
    log_level: LogLevel,

    /// Data directory for credentials, configuration and logs
    #[arg(short = 'd', long, global = true, env = "AUTHFETCH_STATE_DIR")]
    data_dir: Option<PathBuf>,

    /// Client configuration file (defaults to <data-dir>/config.json when present)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Timeout for the whole command in seconds (0 = no timeout)
    #[arg(short = 't', long, global = true, default_value = "60")]
    timeout: u64,

    /// Disable file logging (only log to stderr)
    #[arg(long, global = true)]
    no_file_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(authfetch_client::config::default_data_dir);

    logging::init_logging(cli.log_level.into(), &data_dir, cli.no_file_log)?;

    info!("Starting authfetch");

    let execution = cli.command.execute(data_dir, cli.config);
    let outcome = if cli.timeout == 0 {
        execution.await
    } else {
        match tokio::time::timeout(Duration::from_secs(cli.timeout), execution).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("Command timed out after {} seconds", cli.timeout);
                logging::shutdown_opentelemetry();
                std::process::exit(1);
            }
        }
    };

    logging::shutdown_opentelemetry();
    match outcome {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {e:#}");
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

#[derive(Clone, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        match log_level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

//! Binary entry point for deltafetch.
//!
//! Runs the dedup filter over JSON-lines batches and inspects job state.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

mod commands;

use clap::{Parser, Subcommand};
use deltafetch::DeltaFetchConfig;
use deltafetch::observability::{self, LoggingConfig};
use std::path::Path;
use std::process::ExitCode;

/// Deltafetch - skip requests that already produced items in earlier runs.
#[derive(Parser)]
#[command(name = "deltafetch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "DELTAFETCH_CONFIG_PATH")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Filter JSON-lines output batches from stdin to stdout.
    Filter {
        /// Job name; selects the state file.
        #[arg(short, long)]
        job: String,

        /// Discard the job's history before this run.
        #[arg(long)]
        reset: bool,
    },

    /// Show state directory and per-job key counts.
    Status {
        /// Only show this job.
        #[arg(short, long)]
        job: Option<String>,
    },

    /// Check whether a request has been seen.
    Check {
        /// Job name.
        #[arg(short, long)]
        job: String,

        /// Request URL.
        url: String,

        /// HTTP method.
        #[arg(short, long, default_value = "GET")]
        method: String,

        /// Override key, as carried in `meta.deltafetch_key`.
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Discard a job's history.
    Reset {
        /// Job name.
        #[arg(short, long)]
        job: String,
    },
}

fn main() -> ExitCode {
    // A missing .env file is the common case
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let logging = LoggingConfig::from_settings(Some(&config.logging), cli.verbose);
    if let Err(e) = observability::init(&logging) {
        eprintln!("Failed to initialize observability: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(command: Commands, config: DeltaFetchConfig) -> anyhow::Result<()> {
    match command {
        Commands::Filter { job, reset } => commands::cmd_filter(&config, &job, reset),
        Commands::Status { job } => commands::cmd_status(&config, job.as_deref()),
        Commands::Check {
            job,
            url,
            method,
            key,
        } => commands::cmd_check(&config, &job, &url, &method, key),
        Commands::Reset { job } => commands::cmd_reset(&config, &job),
    }
}

/// Loads configuration from an explicit path or the default location.
fn load_config(path: Option<&str>) -> deltafetch::Result<DeltaFetchConfig> {
    match path.filter(|p| !p.trim().is_empty()) {
        Some(config_path) => DeltaFetchConfig::load_from_file(Path::new(config_path)),
        None => DeltaFetchConfig::load_default(),
    }
}

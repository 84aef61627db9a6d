//! depotsync CLI - inspect, plan and verify depot downloads
//!
//! Configuration is read from `~/.config/depotsync/config.ini` unless
//! `--config` points elsewhere. `RUST_LOG` overrides the configured log
//! level.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use console::style;
use depotsync::logging::init_logging;
use depotsync::EngineConfig;
use tracing::debug;

use commands::inspect::InspectArgs;
use commands::plan::PlanArgs;
use commands::select::SelectArgs;
use commands::snapshot::SnapshotAction;
use commands::verify::VerifyArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "depotsync", version, about = "Content-addressed game depot tooling")]
struct Cli {
    /// Config file to use instead of the per-user default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Summarize a manifest file
    Inspect(InspectArgs),
    /// Resolve chunk URLs and sizes for a manifest
    Plan(PlanArgs),
    /// Pick the build and depots matching the configured language and platform
    Select(SelectArgs),
    /// Check an install directory against a manifest
    Verify(VerifyArgs),
    /// Inspect or clear resume snapshots
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if cli.verbose {
        config.log = config.log.with_level("debug");
    }
    let _log_guard = init_logging(&config.log)?;
    debug!(command = ?cli.command, "Starting");

    match cli.command {
        Commands::Inspect(args) => commands::inspect::run(args),
        Commands::Plan(args) => commands::plan::run(args, &config),
        Commands::Select(args) => commands::select::run(args, &config),
        Commands::Verify(args) => commands::verify::run(args),
        Commands::Snapshot { action } => commands::snapshot::run(action),
    }
}

//! CLI entry point and dispatch
//!
//! `run()` parses arguments, initializes tracing, discovers
//! configuration, and hands off to the command implementations. All
//! operator-facing output happens in `commands`; this module only wires
//! things together.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use convoke_config::Config;

use super::args::{Cli, Commands};
use super::commands;

/// Main CLI execution function.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load(path.as_std_path())
            .with_context(|| format!("Failed to load config from {path}"))?,
        None => Config::discover().context("Failed to discover configuration")?,
    };

    match cli.command {
        Commands::Run { scenario, json } => {
            commands::execute_run(&scenario, &cli.journal_dir, &config, json).await
        }
        Commands::Decide {
            run_id,
            approve,
            reject,
            reason,
            json,
        } => {
            let decision = commands::parse_decision(approve, reject)?;
            commands::execute_decide(&run_id, decision, reason, &cli.journal_dir, &config, json)
                .await
        }
        Commands::Export { run_id } => commands::execute_export(&run_id, &cli.journal_dir),
        Commands::Resume { run_id, json } => {
            commands::execute_resume(&run_id, &cli.journal_dir, &config, json).await
        }
        Commands::Status { run_id, json } => {
            commands::execute_status(&run_id, &cli.journal_dir, json)
        }
    }
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise verbose mode turns on debug-level
/// logging for convoke crates.
fn init_tracing(verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("convoke=debug,info")
            } else {
                EnvFilter::try_new("convoke=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = if verbose {
        fmt::layer().with_target(true).boxed()
    } else {
        fmt::layer().with_target(false).compact().boxed()
    };

    // Ignore the error when a subscriber is already installed (tests).
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

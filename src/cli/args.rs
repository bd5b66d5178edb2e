//! CLI argument definitions and parsing structures

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

/// convoke - multi-agent LLM run orchestrator
#[derive(Parser)]
#[command(name = "convoke")]
#[command(about = "Turn a marketing scenario into a plan, tasks, and a merged client email")]
#[command(long_about = r#"
convoke coordinates multiple LLM-backed agents through a fixed run
sequence (plan -> tasks -> parallel drafts -> merge -> approval gate ->
output), rotating model calls across a pool of API credentials and
journaling every stage transition so a run can be exported and resumed.

EXAMPLES:
  # Run a scenario end to end (pauses when plan confidence is low)
  convoke run demo_inputs/campaign_spike.json

  # See where a run stands
  convoke status run-campaign_spike-20260805T120000Z

  # Approve or reject a run paused at the approval gate
  convoke decide run-campaign_spike-20260805T120000Z --approve
  convoke decide run-campaign_spike-20260805T120000Z --reject --reason "tone too alarmist"

  # Export the full run record, or pick a journaled run back up
  convoke export run-campaign_spike-20260805T120000Z
  convoke resume run-campaign_spike-20260805T120000Z

Credentials come from the env var named by credentials.api_keys_env
(default CONVOKE_API_KEYS, comma-separated). The stub provider needs
no credentials and is useful for dry runs.
"#)]
pub struct Cli {
    /// Path to a convoke.toml config file (default: discovery)
    #[arg(long, global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Directory for run journal snapshots
    #[arg(long, global = true, default_value = ".convoke/runs")]
    pub journal_dir: Utf8PathBuf,

    /// Verbose logging (structured fields, debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a scenario until it completes, pauses, or fails
    Run {
        /// Path to a scenario JSON file ({"id": ..., "notes": ...})
        scenario: Utf8PathBuf,

        /// Emit the final run record as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Apply an external gate decision to a paused run
    Decide {
        /// Run id, as printed by `run` and `status`
        run_id: String,

        /// Approve the plan and produce the output
        #[arg(long, conflicts_with = "reject")]
        approve: bool,

        /// Reject the plan (first rejection replans, the next fails the run)
        #[arg(long, conflicts_with = "approve")]
        reject: bool,

        /// Reason fed back into the replan context on rejection
        #[arg(long)]
        reason: Option<String>,

        /// Emit the resulting run record as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Print a run's full journaled record as JSON
    Export {
        /// Run id to export
        run_id: String,
    },

    /// Resume a journaled run without re-executing completed stages
    Resume {
        /// Run id to resume
        run_id: String,

        /// Emit the resulting run record as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Show a run's stage, approval state, and recent transitions
    Status {
        /// Run id to inspect
        run_id: String,

        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },
}

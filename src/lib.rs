//! convoke - multi-agent LLM run orchestrator
//!
//! convoke turns a marketing scenario into a structured action plan, a
//! set of tasks, and a merged client-ready email, spreading model calls
//! across a rotating pool of API credentials and tolerating individual
//! call failures.
//!
//! The pieces, leaves first:
//!
//! - [`credentials::CredentialPool`] — rotating, failure-aware pool;
//!   round-robin selection, exponential cooldowns, permanent removal of
//!   invalid keys.
//! - [`llm::CallExecutor`] — wraps one model call with the pool, a hard
//!   timeout, and retry/backoff; returns a typed [`llm::CallResult`].
//! - [`engine::WorkerPool`] — fans drafting out to concurrent workers
//!   and joins on all of them, preserving completion order.
//! - [`engine::MergeStage`] — reconciles the surviving drafts into one
//!   artifact.
//! - [`engine::Orchestrator`] — the run state machine: plan → tasks →
//!   parallel drafts → merge → approval gate → output, with a durable
//!   journal for export and resume.
//!
//! # Quick start (CLI)
//!
//! ```bash
//! # Run a scenario (pauses for approval when plan confidence is low)
//! convoke run demo_inputs/campaign_spike.json
//!
//! # Approve or reject a paused run
//! convoke decide run-campaign_spike-20260805T120000Z --approve
//!
//! # Inspect or export a run
//! convoke status run-campaign_spike-20260805T120000Z
//! convoke export run-campaign_spike-20260805T120000Z
//! ```
//!
//! Credentials come from the `CONVOKE_API_KEYS` env var (comma-separated)
//! unless the configured provider is `stub`.

pub mod cli;

pub use convoke_config as config;
pub use convoke_credentials as credentials;
pub use convoke_engine as engine;
pub use convoke_llm as llm;
pub use convoke_utils as utils;

pub use convoke_engine::{Decision, Journal, Orchestrator, RunHandle, RunRecord, Scenario};
pub use convoke_utils::types::{RunId, Stage};

use std::sync::Arc;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use tracing::info;

use convoke_config::Config;
use convoke_credentials::CredentialPool;
use convoke_engine::SimTaskSink;
use convoke_engine::tasks::TaskSink;
use convoke_llm::{CallExecutor, ModelBackend};

/// Wire a full orchestrator from configuration: credential pool, model
/// backend, call executor, task sink, journal.
///
/// With the `stub` provider and no keys in the environment, a synthetic
/// single-key pool is used so dry runs work out of the box.
///
/// # Errors
///
/// Returns an error when the key env var is empty for a real provider or
/// the backend cannot be constructed.
pub fn build_orchestrator(config: Config, journal_dir: Utf8PathBuf) -> Result<Orchestrator> {
    let pool = match CredentialPool::from_env(&config.credentials) {
        Ok(pool) => pool,
        Err(_) if config.provider.provider == "stub" => {
            info!("No credentials in environment; stub provider runs on a synthetic key");
            CredentialPool::from_keys(vec!["stub-0000-key".to_string()], &config.credentials)
        }
        Err(err) => return Err(err).context("failed to load credential pool"),
    };

    let backend: Arc<dyn ModelBackend> =
        convoke_llm::backend_from_config(&config).context("failed to construct model backend")?;
    let executor = Arc::new(CallExecutor::new(Arc::new(pool), backend, &config));
    let task_sink: Arc<dyn TaskSink> = Arc::new(SimTaskSink::new());
    let journal = Journal::new(journal_dir);

    Ok(Orchestrator::new(executor, task_sink, journal, config))
}

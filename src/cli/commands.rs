//! CLI command implementations

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use camino::Utf8Path;

use convoke_config::Config;
use convoke_credentials::CredentialPool;
use convoke_engine::{Decision, Journal, Orchestrator, RunRecord, Scenario, SimTaskSink, TaskSink};
use convoke_llm::{CallExecutor, backend_from_config};
use convoke_utils::types::{RunId, Stage};

/// Number of synthetic keys the stub provider rotates over.
const STUB_POOL_SIZE: usize = 4;

/// Map the `--approve`/`--reject` flag pair onto a decision.
pub fn parse_decision(approve: bool, reject: bool) -> Result<Decision> {
    match (approve, reject) {
        (true, false) => Ok(Decision::Approve),
        (false, true) => Ok(Decision::Reject),
        _ => bail!("Pass exactly one of --approve or --reject"),
    }
}

/// Execute the `run` command.
pub async fn execute_run(
    scenario_path: &Utf8Path,
    journal_dir: &Utf8Path,
    config: &Config,
    json: bool,
) -> Result<()> {
    let text = fs::read_to_string(scenario_path)
        .with_context(|| format!("Failed to read scenario file: {scenario_path}"))?;
    let scenario: Scenario = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse scenario file: {scenario_path}"))?;

    let orchestrator = build_orchestrator(config, journal_dir)?;
    let record = orchestrator.start(scenario).await?;

    emit_record(&record, config, json);
    Ok(())
}

/// Execute the `decide` command.
pub async fn execute_decide(
    run_id: &str,
    decision: Decision,
    reason: Option<String>,
    journal_dir: &Utf8Path,
    config: &Config,
    json: bool,
) -> Result<()> {
    let run_id = RunId::from_string(run_id);
    let record = load_record(journal_dir, &run_id)?;

    if !(record.paused && record.stage == Stage::ApprovalGate) {
        bail!(
            "Run {} is not paused at the approval gate (stage: {}); nothing to decide",
            run_id,
            record.stage
        );
    }

    // Re-register the paused record with a live orchestrator, then apply
    // the decision; `decide` drives the run onward and journals as it goes.
    let orchestrator = build_orchestrator(config, journal_dir)?;
    let handle = orchestrator.resume(record).await?;
    let decided = orchestrator.decide(&handle.run_id, decision, reason).await?;

    emit_record(&decided, config, json);
    Ok(())
}

/// Execute the `export` command: the full record as JSON on stdout.
pub fn execute_export(run_id: &str, journal_dir: &Utf8Path) -> Result<()> {
    let run_id = RunId::from_string(run_id);
    let record = load_record(journal_dir, &run_id)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// Execute the `resume` command.
pub async fn execute_resume(
    run_id: &str,
    journal_dir: &Utf8Path,
    config: &Config,
    json: bool,
) -> Result<()> {
    let run_id = RunId::from_string(run_id);
    let record = load_record(journal_dir, &run_id)?;

    if record.stage.is_terminal() {
        bail!(
            "Run {} already reached terminal stage {}; nothing to resume",
            run_id,
            record.stage
        );
    }

    let orchestrator = build_orchestrator(config, journal_dir)?;
    let handle = orchestrator.resume(record).await?;
    let resumed = orchestrator
        .export(&handle.run_id)
        .context("Resumed run disappeared from the registry")?;

    emit_record(&resumed, config, json);
    Ok(())
}

/// Execute the `status` command.
pub fn execute_status(run_id: &str, journal_dir: &Utf8Path, json: bool) -> Result<()> {
    let run_id = RunId::from_string(run_id);
    let record = load_record(journal_dir, &run_id)?;

    if json {
        let summary = serde_json::json!({
            "run_id": record.run_id,
            "scenario": record.scenario.id,
            "stage": record.stage,
            "seq": record.seq,
            "paused": record.paused,
            "approval": record.approval,
            "rejections": record.rejections,
            "calls": record.calls.len(),
            "tasks_submitted": record.task_acks.len(),
            "started_at": record.started_at,
            "updated_at": record.updated_at,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Run: {}", record.run_id);
    println!("  Scenario: {}", record.scenario.id);
    println!("  Stage: {}{}", record.stage, if record.paused { " (paused)" } else { "" });
    println!("  Approval: {:?}, rejections: {}", record.approval, record.rejections);
    println!(
        "  Calls: {}, tasks submitted: {}",
        record.calls.len(),
        record.task_acks.len()
    );
    println!("  Recent transitions:");
    for entry in record.trace.iter().rev().take(5).collect::<Vec<_>>().into_iter().rev() {
        println!(
            "    [{:>3}] {} {} — {}",
            entry.seq,
            entry.at.format("%H:%M:%S"),
            entry.stage,
            entry.event
        );
    }
    Ok(())
}

/// Wire pool, backend, executor, task sink, and journal into an
/// orchestrator per the configuration.
fn build_orchestrator(config: &Config, journal_dir: &Utf8Path) -> Result<Orchestrator> {
    let pool = if config.provider.provider == "stub" {
        let keys = (1..=STUB_POOL_SIZE).map(|i| format!("stub-key-{i}")).collect();
        Arc::new(CredentialPool::from_keys(keys, &config.credentials))
    } else {
        Arc::new(
            CredentialPool::from_env(&config.credentials)
                .context("Failed to load the credential pool")?,
        )
    };

    let backend = backend_from_config(config).context("Failed to construct the model backend")?;
    let executor = Arc::new(CallExecutor::new(pool, backend, config));
    let task_sink: Arc<dyn TaskSink> = Arc::new(SimTaskSink::new());
    let journal = Journal::new(journal_dir);

    Ok(Orchestrator::new(executor, task_sink, journal, config.clone()))
}

fn load_record(journal_dir: &Utf8Path, run_id: &RunId) -> Result<RunRecord> {
    let journal = Journal::new(journal_dir);
    journal
        .load_latest(run_id)?
        .with_context(|| format!("No journaled run found for {run_id} under {journal_dir}"))
}

/// Human or JSON rendering of a run's outcome.
fn emit_record(record: &RunRecord, config: &Config, json: bool) {
    if json {
        match serde_json::to_string_pretty(record) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("Failed to serialize run record: {e}"),
        }
        return;
    }

    println!("Run: {}", record.run_id);
    println!("  Stage: {}{}", record.stage, if record.paused { " (paused)" } else { "" });

    match record.stage {
        Stage::Output => {
            if let Some(email) = &record.merged {
                println!("\nFinal email:");
                println!("  To: {}", email.to);
                println!("  Subject: {}", email.subject);
                println!("\n{}", email.body);
            }
        }
        Stage::ApprovalGate if record.paused => {
            if let Some(plan) = &record.plan {
                let threshold = config.approval.confidence_threshold;
                println!("\nLow-confidence actions (threshold {threshold}):");
                for action in plan.low_confidence_actions(threshold) {
                    println!(
                        "  - {} (confidence {:.2}): {}",
                        action.action_type, action.confidence, action.reason
                    );
                }
            }
            if let Some(email) = &record.merged {
                println!("\nMerged draft awaiting approval:");
                println!("  Subject: {}", email.subject);
            }
            println!(
                "\nDecide with: convoke decide {} --approve | --reject [--reason ...]",
                record.run_id
            );
        }
        Stage::Failed => {
            if let Some(entry) = record.trace.last() {
                println!("  Failure: {}", entry.event);
            }
        }
        _ => {}
    }
}

//! The persisted state of one run
//!
//! A [`RunRecord`] is the single unit of durable state for a scenario
//! execution. It is owned by the state machine and mutated only through
//! the transition methods here; nothing else writes to it, and it is
//! never shared across concurrent tasks. Every transition bumps the
//! sequence number and appends a trace entry, which is what makes a
//! crash between stages resumable from the last snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use convoke_llm::{CallResult, EmailDraft, Plan};
use convoke_utils::types::{RunId, Stage};

use crate::scenario::Scenario;
use crate::tasks::{TaskAck, TaskRequest};

/// The gate decision state carried by the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
}

/// An external decision at the approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// One entry in the run's transition trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub seq: u64,
    pub stage: Stage,
    pub at: DateTime<Utc>,
    pub event: String,
    /// BLAKE3 hash of the prompt when this entry covers a model call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_hash: Option<String>,
}

/// A submitted task record plus the boundary's acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAckRecord {
    pub task: TaskRequest,
    pub ack: TaskAck,
}

/// The full, serializable state of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub scenario: Scenario,
    /// Stage the run will execute next (or is paused/terminal at).
    pub stage: Stage,
    /// Monotonic transition counter; also the snapshot ordering key.
    pub seq: u64,
    /// True while the run waits for an external gate decision.
    pub paused: bool,
    pub approval: ApprovalState,
    /// Gate rejections so far; bounds the automatic replans.
    pub rejections: u32,
    pub rejection_reasons: Vec<String>,
    /// Every call result the run produced, in execution order.
    pub calls: Vec<CallResult>,
    /// Indices into `calls` for the drafting results, completion order.
    pub draft_indices: Vec<usize>,
    pub plan: Option<Plan>,
    pub task_acks: Vec<TaskAckRecord>,
    pub merged: Option<EmailDraft>,
    pub trace: Vec<TraceEntry>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    /// Create a fresh record at `Planning`, with the creation event as
    /// the first trace entry.
    #[must_use]
    pub fn new(scenario: Scenario) -> Self {
        let started_at = Utc::now();
        let run_id = RunId::derive(&scenario.id, started_at);
        Self {
            run_id,
            scenario,
            stage: Stage::Planning,
            seq: 0,
            paused: false,
            approval: ApprovalState::Pending,
            rejections: 0,
            rejection_reasons: Vec::new(),
            calls: Vec::new(),
            draft_indices: Vec::new(),
            plan: None,
            task_acks: Vec::new(),
            merged: None,
            trace: vec![TraceEntry {
                seq: 0,
                stage: Stage::Planning,
                at: started_at,
                event: "run created".to_string(),
                prompt_hash: None,
            }],
            started_at,
            updated_at: started_at,
        }
    }

    /// Advance to `stage`, bumping the sequence number and appending the
    /// transition to the trace. The forward-only invariant lives in the
    /// state machine; this method just records what it decided.
    pub fn advance_to(&mut self, stage: Stage, event: impl Into<String>) {
        self.seq += 1;
        self.stage = stage;
        self.updated_at = Utc::now();
        self.trace.push(TraceEntry {
            seq: self.seq,
            stage,
            at: self.updated_at,
            event: event.into(),
            prompt_hash: None,
        });
    }

    /// Append a non-transition event to the trace at the current stage.
    pub fn note(&mut self, event: impl Into<String>, prompt_hash: Option<String>) {
        self.updated_at = Utc::now();
        self.trace.push(TraceEntry {
            seq: self.seq,
            stage: self.stage,
            at: self.updated_at,
            event: event.into(),
            prompt_hash,
        });
    }

    /// Record a call result, noting it in the trace, and return its
    /// index into `calls`.
    pub fn record_call(&mut self, result: CallResult) -> usize {
        let event = if result.is_success() {
            format!(
                "call succeeded after {} attempt(s) via {}",
                result.attempts,
                result
                    .credential
                    .map_or_else(|| "-".to_string(), |c| c.to_string())
            )
        } else {
            format!("call failed after {} attempt(s)", result.attempts)
        };
        self.note(event, Some(result.prompt_hash.clone()));
        self.calls.push(result);
        self.calls.len() - 1
    }

    /// The drafting results in completion order, resolved from indices.
    #[must_use]
    pub fn draft_results(&self) -> Vec<&CallResult> {
        self.draft_indices
            .iter()
            .filter_map(|&i| self.calls.get(i))
            .collect()
    }
}

//! Orchestration engine for convoke
//!
//! This crate wires the call executor into the shape of a run: the
//! drafting worker pool, the merge stage, the task derivation boundary,
//! and the run state machine that sequences them, records every
//! transition, and pauses for approval when a plan's confidence is too
//! low. The journal makes each transition durable so a run can be
//! exported mid-flight and resumed without re-executing finished stages.

pub mod drafting;
pub mod journal;
pub mod machine;
pub mod merge;
pub mod record;
mod repair;
pub mod scenario;
pub mod tasks;

pub use drafting::{DraftSet, WorkerPool};
pub use journal::Journal;
pub use machine::{Orchestrator, RunHandle};
pub use merge::{MergeOutcome, MergeStage};
pub use record::{ApprovalState, Decision, RunRecord, TaskAckRecord, TraceEntry};
pub use scenario::Scenario;
pub use tasks::{SimTaskSink, TaskAck, TaskRequest, TaskSink, derive_tasks};

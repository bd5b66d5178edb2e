//! Core identity and stage types shared across the workspace

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stages of a run, in the order the state machine advances through them.
///
/// The sequence is total and forward-only: `Planning` through
/// `ApprovalGate` advance strictly in order, `Output` and `Failed` are
/// terminal, and the single backward edge `Rejected -> Planning` is taken
/// at most a configured number of times after a gate rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// One model call producing a structured action plan.
    Planning,
    /// Pure transformation of plan actions into task records.
    TaskDerivation,
    /// Parallel drafting through the worker pool.
    Drafting,
    /// Reconciliation of successful drafts into one artifact.
    Merging,
    /// Confidence check; pauses for an external decision when low.
    ApprovalGate,
    /// Terminal success: the merged artifact is the run's output.
    Output,
    /// Gate rejection recorded; replans once, then fails.
    Rejected,
    /// Terminal failure; the trace up to this point is preserved.
    Failed,
}

impl Stage {
    /// Returns the canonical lowercase name used in traces, journal
    /// snapshots, and CLI output.
    ///
    /// # Example
    ///
    /// ```rust
    /// use convoke_utils::types::Stage;
    ///
    /// assert_eq!(Stage::Planning.as_str(), "planning");
    /// assert_eq!(Stage::ApprovalGate.as_str(), "approval_gate");
    /// ```
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::TaskDerivation => "task_derivation",
            Self::Drafting => "drafting",
            Self::Merging => "merging",
            Self::ApprovalGate => "approval_gate",
            Self::Output => "output",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }

    /// Whether the run can make no further progress from this stage.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Output | Self::Failed)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier for one run of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Derive a run id from the scenario id and a start timestamp.
    ///
    /// The timestamp component keeps journal snapshot filenames sortable
    /// without any extra bookkeeping.
    #[must_use]
    pub fn derive(scenario_id: &str, started_at: DateTime<Utc>) -> Self {
        Self(format!(
            "run-{}-{}",
            scenario_id,
            started_at.format("%Y%m%dT%H%M%SZ")
        ))
    }

    /// Wrap an existing id, e.g. one read back from a journal snapshot.
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one credential in the router's pool.
///
/// The id is an index into the pool, stable for the life of the process.
/// The raw API key never appears in logs or results; use [`mask_key`]
/// for anything operator-facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialId(pub u32);

impl std::fmt::Display for CredentialId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cred-{}", self.0)
    }
}

/// Masked representation of an API key for logs, e.g. `...a1b2c3`.
#[must_use]
pub fn mask_key(key: &str) -> String {
    if key.is_empty() {
        return "EMPTY".to_string();
    }
    if key.len() <= 8 {
        return format!("...{key}");
    }
    let tail: String = key.chars().rev().take(6).collect::<Vec<_>>().into_iter().rev().collect();
    format!("...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_are_stable() {
        assert_eq!(Stage::Planning.as_str(), "planning");
        assert_eq!(Stage::TaskDerivation.as_str(), "task_derivation");
        assert_eq!(Stage::Drafting.as_str(), "drafting");
        assert_eq!(Stage::Merging.as_str(), "merging");
        assert_eq!(Stage::ApprovalGate.as_str(), "approval_gate");
        assert_eq!(Stage::Output.as_str(), "output");
        assert_eq!(Stage::Rejected.as_str(), "rejected");
        assert_eq!(Stage::Failed.as_str(), "failed");
    }

    #[test]
    fn only_output_and_failed_are_terminal() {
        assert!(Stage::Output.is_terminal());
        assert!(Stage::Failed.is_terminal());
        assert!(!Stage::Planning.is_terminal());
        assert!(!Stage::Rejected.is_terminal());
        assert!(!Stage::ApprovalGate.is_terminal());
    }

    #[test]
    fn run_id_embeds_scenario_and_timestamp() {
        let at = chrono::DateTime::parse_from_rfc3339("2026-08-05T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let id = RunId::derive("campaign_spike", at);
        assert_eq!(id.as_str(), "run-campaign_spike-20260805T120000Z");
    }

    #[test]
    fn mask_key_shows_only_tail() {
        assert_eq!(mask_key(""), "EMPTY");
        assert_eq!(mask_key("short"), "...short");
        assert_eq!(mask_key("sk-aaaa-bbbb-cccc-a1b2c3"), "...a1b2c3");
        assert!(!mask_key("sk-aaaa-bbbb-cccc-a1b2c3").contains("sk-aaaa"));
    }
}

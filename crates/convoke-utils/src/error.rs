//! Failure taxonomy for the orchestration core
//!
//! Every failure that crosses a component boundary is one of the kinds
//! defined here. Transport-level detail stays inside the call executor;
//! stages and the run state machine only ever see (and log) taxonomy
//! kinds, never raw provider errors.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{RunId, Stage};

/// Classification of a credential-implicating failure.
///
/// Reported back to the router after every failed call so it can move
/// the credential into cooldown or out of rotation entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialFailure {
    /// Provider signalled quota/rate limiting (HTTP 429).
    RateLimited,
    /// Credential rejected outright (HTTP 401/403); permanent.
    Invalid,
    /// Transient transport or provider fault (5xx, connect error, timeout).
    Transient,
}

/// Error from a single model backend invocation, before the executor's
/// retry loop has classified and absorbed it.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Transport-level failure (connect, DNS, body read)
    #[error("transport error: {0}")]
    Transport(String),

    /// Credential rejected by the provider (401, 403)
    #[error("provider rejected credential: {0}")]
    ProviderAuth(String),

    /// Provider quota/rate limit exceeded (429)
    #[error("provider quota exceeded: {0}")]
    ProviderQuota(String),

    /// Provider service outage (5xx errors)
    #[error("provider outage: {0}")]
    ProviderOutage(String),

    /// Invocation exceeded the hard timeout
    #[error("timeout after {duration:?}")]
    Timeout { duration: Duration },

    /// Backend construction or configuration error
    #[error("misconfiguration: {0}")]
    Misconfiguration(String),
}

impl ModelError {
    /// Map this error onto the credential failure it implies, if any.
    ///
    /// `Misconfiguration` implicates the process, not the credential,
    /// and returns `None`.
    #[must_use]
    pub const fn credential_failure(&self) -> Option<CredentialFailure> {
        match self {
            Self::ProviderQuota(_) => Some(CredentialFailure::RateLimited),
            Self::ProviderAuth(_) => Some(CredentialFailure::Invalid),
            Self::Transport(_) | Self::ProviderOutage(_) | Self::Timeout { .. } => {
                Some(CredentialFailure::Transient)
            }
            Self::Misconfiguration(_) => None,
        }
    }
}

/// Terminal failure of one executed call, as recorded on a `CallResult`.
///
/// This is what escapes the call executor once its retry budget is
/// spent; everything recoverable has already been recovered.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum CallFailure {
    /// Retries exhausted; the last classified failure is carried.
    #[error("credential failure, retries exhausted: {0:?}")]
    Credential(CredentialFailure),

    /// The router had nothing available after the bounded acquire wait.
    #[error("no credential available after bounded wait")]
    CapacityExhausted,

    /// The model responded but the payload failed stage schema validation.
    #[error("response failed schema validation: {0}")]
    SchemaViolation(String),
}

/// Failure that surfaces from a stage to the run state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum StageError {
    /// The merge input contained zero successful drafts.
    #[error("no viable drafts to merge")]
    NoViableDrafts,

    /// A stage precondition cannot be satisfied; the run fails.
    #[error("stage {stage} failed: {reason}")]
    Fatal { stage: Stage, reason: String },
}

/// Error from the external approval boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApprovalError {
    /// `decide` is callable exactly once per gate pause.
    #[error("run {0} is not paused at the approval gate")]
    NotPaused(RunId),

    /// The run id is not registered with this orchestrator.
    #[error("unknown run: {0}")]
    UnknownRun(RunId),
}

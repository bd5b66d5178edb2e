//! Core types for the model call boundary

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use convoke_utils::error::{CallFailure, ModelError};
use convoke_utils::types::{CredentialId, Stage};

use crate::schema::{EmailDraft, Plan};

/// One outbound call as a stage describes it. Immutable once built; the
/// executor derives everything else (credential, timeout, wire request)
/// itself.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub scenario_id: String,
    /// The stage this call belongs to; selects the response schema.
    pub stage: Stage,
    pub prompt: String,
    /// Declared output token budget for this call.
    pub max_output_tokens: u32,
    /// Attempts the executor may spend before the failure escapes.
    pub max_retries: u32,
}

impl CallRequest {
    #[must_use]
    pub fn new(
        scenario_id: impl Into<String>,
        stage: Stage,
        prompt: impl Into<String>,
        max_output_tokens: u32,
        max_retries: u32,
    ) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            stage,
            prompt: prompt.into(),
            max_output_tokens,
            max_retries,
        }
    }

    /// Derive a new request with a different prompt and budget, keeping
    /// the rest. Used for the single schema-repair retry.
    #[must_use]
    pub fn with_prompt(&self, prompt: impl Into<String>, max_output_tokens: u32) -> Self {
        Self {
            scenario_id: self.scenario_id.clone(),
            stage: self.stage,
            prompt: prompt.into(),
            max_output_tokens,
            max_retries: self.max_retries,
        }
    }
}

/// Structured payload extracted from a schema-valid response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum StagePayload {
    /// Planning output: proposed actions plus a summary.
    Plan(Plan),
    /// One worker's independent draft.
    Draft(EmailDraft),
    /// The reconciled artifact out of the merge stage.
    Merged(EmailDraft),
}

/// Success-or-typed-failure for one executed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum CallOutcome {
    Success { payload: StagePayload },
    Failure { failure: CallFailure },
}

/// What the executor hands back for every call: the outcome plus enough
/// tags (serving credential, attempt count, prompt hash) for the trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
    pub outcome: CallOutcome,
    /// Credential that served (or last attempted) the call.
    pub credential: Option<CredentialId>,
    pub attempts: u32,
    /// BLAKE3 hash of the prompt payload, recorded as trace evidence.
    pub prompt_hash: String,
}

impl CallResult {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, CallOutcome::Success { .. })
    }

    /// The payload, when the call succeeded.
    #[must_use]
    pub const fn payload(&self) -> Option<&StagePayload> {
        match &self.outcome {
            CallOutcome::Success { payload } => Some(payload),
            CallOutcome::Failure { .. } => None,
        }
    }

    /// The typed failure, when the call did not succeed.
    #[must_use]
    pub const fn failure(&self) -> Option<&CallFailure> {
        match &self.outcome {
            CallOutcome::Failure { failure } => Some(failure),
            CallOutcome::Success { .. } => None,
        }
    }
}

/// Wire-level request handed to a backend, already resolved from the
/// `CallRequest` and provider configuration.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub scenario_id: String,
    pub stage: Stage,
    pub prompt: String,
    pub model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

/// Raw response from a backend, before schema validation.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub raw: String,
    pub provider: String,
    pub model_used: String,
}

/// Trait for model backend implementations.
///
/// The credential key arrives per call: backends hold no credential
/// state, the pool owns all of it.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Issue one model call with the given credential key.
    ///
    /// # Errors
    ///
    /// Returns `ModelError` for transport faults, provider rejections
    /// (auth, quota, outage), and timeouts.
    async fn invoke(&self, key: &str, request: &ModelRequest) -> Result<ModelResponse, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoke_utils::error::CredentialFailure;

    #[test]
    fn call_result_accessors() {
        let ok = CallResult {
            outcome: CallOutcome::Success {
                payload: StagePayload::Draft(EmailDraft {
                    to: "client@example.com".into(),
                    subject: "Update".into(),
                    body: "Hello".into(),
                }),
            },
            credential: Some(CredentialId(1)),
            attempts: 2,
            prompt_hash: "abc".into(),
        };
        assert!(ok.is_success());
        assert!(ok.payload().is_some());
        assert!(ok.failure().is_none());

        let failed = CallResult {
            outcome: CallOutcome::Failure {
                failure: CallFailure::Credential(CredentialFailure::RateLimited),
            },
            credential: Some(CredentialId(0)),
            attempts: 4,
            prompt_hash: "abc".into(),
        };
        assert!(!failed.is_success());
        assert!(failed.payload().is_none());
    }

    #[test]
    fn call_result_round_trips_through_json() {
        let result = CallResult {
            outcome: CallOutcome::Failure {
                failure: CallFailure::CapacityExhausted,
            },
            credential: None,
            attempts: 1,
            prompt_hash: "deadbeef".into(),
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: CallResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn repair_request_keeps_identity_fields() {
        let request = CallRequest::new("s1", Stage::Drafting, "original", 250, 4);
        let repaired = request.with_prompt("repair", 150);
        assert_eq!(repaired.scenario_id, "s1");
        assert_eq!(repaired.stage, Stage::Drafting);
        assert_eq!(repaired.prompt, "repair");
        assert_eq!(repaired.max_output_tokens, 150);
        assert_eq!(repaired.max_retries, 4);
    }
}

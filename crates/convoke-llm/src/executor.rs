//! Retrying call executor
//!
//! One [`CallExecutor::execute`] call is the whole story of one model
//! call: credential acquisition with a bounded jittered wait, a hard
//! timeout around the backend invocation, failure classification and
//! reporting back to the pool, and retry with a fresh credential. The
//! surface is infallible; whatever is left after the retry budget is
//! spent comes back as a typed failure inside the [`CallResult`].

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use convoke_config::{Config, ExecutorConfig, ProviderConfig};
use convoke_credentials::{CredentialLease, CredentialPool, Outcome};
use convoke_utils::error::{CallFailure, CredentialFailure, ModelError};

use crate::schema;
use crate::types::{CallOutcome, CallRequest, CallResult, ModelBackend, ModelRequest};

pub struct CallExecutor {
    pool: Arc<CredentialPool>,
    backend: Arc<dyn ModelBackend>,
    provider: ProviderConfig,
    policy: ExecutorConfig,
}

impl CallExecutor {
    #[must_use]
    pub fn new(pool: Arc<CredentialPool>, backend: Arc<dyn ModelBackend>, config: &Config) -> Self {
        Self {
            pool,
            backend,
            provider: config.provider.clone(),
            policy: config.executor.clone(),
        }
    }

    /// Execute one call to a terminal outcome.
    ///
    /// Credential failures and capacity waits are absorbed here; the
    /// returned result always carries the attempt count and the serving
    /// (or last attempted) credential id.
    pub async fn execute(&self, request: &CallRequest) -> CallResult {
        let prompt_hash = crate::prompt_hash(&request.prompt);
        let timeout = Duration::from_secs(self.policy.call_timeout_secs);

        let mut attempts = 0u32;
        let mut last_credential = None;
        let mut last_failure = CredentialFailure::Transient;

        for attempt in 1..=request.max_retries {
            let Some(lease) = self.acquire_with_wait().await else {
                warn!(
                    scenario = %request.scenario_id,
                    stage = %request.stage,
                    attempts,
                    "No credential available after bounded wait"
                );
                return CallResult {
                    outcome: CallOutcome::Failure {
                        failure: CallFailure::CapacityExhausted,
                    },
                    credential: last_credential,
                    attempts,
                    prompt_hash,
                };
            };

            attempts = attempt;
            last_credential = Some(lease.id);
            debug!(
                scenario = %request.scenario_id,
                stage = %request.stage,
                credential = %lease.id,
                attempt,
                "Executing model call"
            );

            let model_request = self.model_request(request);
            let invocation = self.backend.invoke(&lease.key, &model_request);
            let result = match tokio::time::timeout(timeout, invocation).await {
                Ok(result) => result,
                Err(_) => Err(ModelError::Timeout { duration: timeout }),
            };

            match result {
                Ok(response) => match schema::validate(request.stage, &response.raw) {
                    Ok(payload) => {
                        self.pool.report(lease.id, Outcome::Success);
                        return CallResult {
                            outcome: CallOutcome::Success { payload },
                            credential: Some(lease.id),
                            attempts,
                            prompt_hash,
                        };
                    }
                    Err(reason) => {
                        // The transport and credential did their job; the
                        // payload is the problem. No retry at this layer.
                        self.pool.report(lease.id, Outcome::Success);
                        debug!(
                            scenario = %request.scenario_id,
                            stage = %request.stage,
                            reason = %reason,
                            "Response failed schema validation"
                        );
                        return CallResult {
                            outcome: CallOutcome::Failure {
                                failure: CallFailure::SchemaViolation(reason),
                            },
                            credential: Some(lease.id),
                            attempts,
                            prompt_hash,
                        };
                    }
                },
                Err(err) => {
                    self.handle_call_error(&lease, &err, &mut last_failure, request);
                }
            }

            if attempt < request.max_retries {
                let backoff = self.attempt_backoff(attempt);
                debug!(backoff_ms = backoff.as_millis() as u64, "Backing off before retry");
                tokio::time::sleep(backoff).await;
            }
        }

        CallResult {
            outcome: CallOutcome::Failure {
                failure: CallFailure::Credential(last_failure),
            },
            credential: last_credential,
            attempts,
            prompt_hash,
        }
    }

    fn handle_call_error(
        &self,
        lease: &CredentialLease,
        err: &ModelError,
        last_failure: &mut CredentialFailure,
        request: &CallRequest,
    ) {
        match err.credential_failure() {
            Some(kind) => {
                let outcome = match kind {
                    CredentialFailure::RateLimited => Outcome::RateLimited,
                    CredentialFailure::Invalid => Outcome::Invalid,
                    CredentialFailure::Transient => Outcome::TransientError,
                };
                self.pool.report(lease.id, outcome);
                *last_failure = kind;
                warn!(
                    scenario = %request.scenario_id,
                    stage = %request.stage,
                    credential = %lease.id,
                    kind = ?kind,
                    error = %err,
                    "Model call failed, rotating credential"
                );
            }
            None => {
                // Not the credential's fault; leave its state alone.
                *last_failure = CredentialFailure::Transient;
                warn!(
                    scenario = %request.scenario_id,
                    stage = %request.stage,
                    error = %err,
                    "Model call failed without implicating the credential"
                );
            }
        }
    }

    /// Retry `acquire` with jittered waits, up to the configured bound.
    async fn acquire_with_wait(&self) -> Option<CredentialLease> {
        for attempt in 0..self.policy.acquire_attempts {
            if let Some(lease) = self.pool.acquire() {
                return Some(lease);
            }
            if attempt + 1 < self.policy.acquire_attempts {
                let base = Duration::from_millis(self.policy.acquire_wait_ms << attempt.min(8));
                tokio::time::sleep(jittered(base)).await;
            }
        }
        None
    }

    fn attempt_backoff(&self, attempt: u32) -> Duration {
        let base =
            Duration::from_millis(self.policy.backoff_base_ms << (attempt - 1).min(8));
        jittered(base)
    }

    fn model_request(&self, request: &CallRequest) -> ModelRequest {
        ModelRequest {
            scenario_id: request.scenario_id.clone(),
            stage: request.stage,
            prompt: request.prompt.clone(),
            model: self.provider.model.clone(),
            max_output_tokens: request.max_output_tokens,
            temperature: self.provider.temperature,
        }
    }
}

/// Multiply a duration by a uniform factor in [0.5, 1.5).
fn jittered(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.5..1.5);
    base.mul_f64(factor)
}

//! Parallel drafting worker pool
//!
//! `width` independent executor invocations of the same template run on
//! a `JoinSet`, each acquiring its own credential, so one rate-limited
//! key cannot stall the batch. The pool joins on *all* workers — a
//! worker's failure never cancels its siblings — and collects results in
//! the order workers complete, which is the order the merge stage
//! consumes.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use convoke_llm::{CallExecutor, CallOutcome, CallRequest, CallResult, EmailDraft, StagePayload};
use convoke_utils::error::{CallFailure, CredentialFailure};

use crate::repair::execute_with_repair;

/// Draft results in worker completion order.
#[derive(Debug, Clone)]
pub struct DraftSet {
    results: Vec<CallResult>,
}

impl DraftSet {
    /// Rebuild a set from recorded results (resume path and tests).
    #[must_use]
    pub fn from_results(results: Vec<CallResult>) -> Self {
        Self { results }
    }

    /// Every result, successes and failures alike, completion order.
    #[must_use]
    pub fn results(&self) -> &[CallResult] {
        &self.results
    }

    /// The successful drafts, completion order preserved.
    #[must_use]
    pub fn successes(&self) -> Vec<&EmailDraft> {
        self.results
            .iter()
            .filter_map(|r| match r.payload() {
                Some(StagePayload::Draft(draft)) => Some(draft),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.results.iter().all(|r| !r.is_success())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

pub struct WorkerPool {
    executor: Arc<CallExecutor>,
    width: usize,
    repair_max_tokens: u32,
}

impl WorkerPool {
    #[must_use]
    pub fn new(executor: Arc<CallExecutor>, width: usize, repair_max_tokens: u32) -> Self {
        Self {
            executor,
            width,
            repair_max_tokens,
        }
    }

    /// Fan the template out to `width` workers and join on all of them.
    ///
    /// Returns one terminal result per worker, plus the violating first
    /// call of any worker that needed a schema repair. An all-failure
    /// set is the caller's problem to escalate; workers already spent
    /// their own retry budgets, so the pool never retries the batch.
    pub async fn draft(&self, template: &CallRequest) -> DraftSet {
        debug!(width = self.width, stage = %template.stage, "Spawning draft workers");

        let mut join_set = JoinSet::new();
        for worker in 0..self.width {
            let executor = Arc::clone(&self.executor);
            let request = template.clone();
            let repair_max_tokens = self.repair_max_tokens;
            join_set.spawn(async move {
                let (result, violation) =
                    execute_with_repair(&executor, &request, repair_max_tokens).await;
                debug!(worker, success = result.is_success(), "Draft worker finished");
                (result, violation)
            });
        }

        let mut results = Vec::with_capacity(self.width);
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((result, violation)) => {
                    // The violating first call is kept too: the record
                    // wants every call result the run produced.
                    if let Some(violation) = violation {
                        results.push(violation);
                    }
                    results.push(result);
                }
                Err(e) => {
                    warn!(error = %e, "Draft worker panicked; counting it as a failed draft");
                    results.push(CallResult {
                        outcome: CallOutcome::Failure {
                            failure: CallFailure::Credential(CredentialFailure::Transient),
                        },
                        credential: None,
                        attempts: 0,
                        prompt_hash: convoke_llm::prompt_hash(&template.prompt),
                    });
                }
            }
        }

        DraftSet { results }
    }
}

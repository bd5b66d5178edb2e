//! Merge stage: reconcile drafts into one artifact
//!
//! Zero successes is a failure, one success passes through untouched,
//! and two or more go back to the model as one reconciliation call whose
//! input lists the drafts in completion order. Because completion order
//! feeds the prompt, reruns of the same scenario are not byte-identical;
//! that is accepted, not a defect.

use std::sync::Arc;

use tracing::debug;

use convoke_llm::{CallExecutor, CallRequest, CallResult, EmailDraft, StagePayload};
use convoke_utils::error::StageError;
use convoke_utils::types::Stage;

use crate::drafting::DraftSet;
use crate::repair::execute_with_repair;

/// What the merge stage produced, with the calls it spent doing so.
#[derive(Debug)]
pub enum MergeOutcome {
    /// Exactly one viable draft; returned unchanged, no model call.
    PassThrough(EmailDraft),
    /// Model-reconciled artifact, plus the call(s) that produced it.
    Reconciled {
        draft: EmailDraft,
        calls: Vec<CallResult>,
    },
    /// Zero viable drafts, or the reconciliation call itself failed.
    Failed {
        error: StageError,
        calls: Vec<CallResult>,
    },
}

pub struct MergeStage {
    executor: Arc<CallExecutor>,
    repair_max_tokens: u32,
}

impl MergeStage {
    #[must_use]
    pub fn new(executor: Arc<CallExecutor>, repair_max_tokens: u32) -> Self {
        Self {
            executor,
            repair_max_tokens,
        }
    }

    /// Merge the successful drafts of `set` into one artifact.
    pub async fn merge(
        &self,
        scenario_id: &str,
        subject_hint: &str,
        set: &DraftSet,
        max_output_tokens: u32,
        max_retries: u32,
    ) -> MergeOutcome {
        let successes = set.successes();

        match successes.len() {
            0 => MergeOutcome::Failed {
                error: StageError::NoViableDrafts,
                calls: Vec::new(),
            },
            1 => {
                debug!(scenario = %scenario_id, "Single viable draft, passing through");
                MergeOutcome::PassThrough(successes[0].clone())
            }
            n => {
                debug!(scenario = %scenario_id, drafts = n, "Reconciling drafts");
                let prompt = merge_prompt(&successes, subject_hint);
                let request = CallRequest::new(
                    scenario_id,
                    Stage::Merging,
                    prompt,
                    max_output_tokens,
                    max_retries,
                );
                let (result, violation) =
                    execute_with_repair(&self.executor, &request, self.repair_max_tokens).await;

                let mut calls: Vec<CallResult> = violation.into_iter().collect();
                match result.payload().cloned() {
                    Some(StagePayload::Merged(draft)) => {
                        calls.push(result);
                        MergeOutcome::Reconciled { draft, calls }
                    }
                    _ => {
                        let reason = result
                            .failure()
                            .map_or_else(|| "unexpected payload".to_string(), |f| f.to_string());
                        calls.push(result);
                        MergeOutcome::Failed {
                            error: StageError::Fatal {
                                stage: Stage::Merging,
                                reason,
                            },
                            calls,
                        }
                    }
                }
            }
        }
    }
}

/// Reconciliation prompt: every draft as JSON, completion order, then
/// the subject hint.
fn merge_prompt(drafts: &[&EmailDraft], subject_hint: &str) -> String {
    let mut prompt = String::from(
        "You will receive multiple draft emails as JSON. Produce ONE final email as JSON: \
         {\"to\":\"...\",\"subject\":\"...\",\"body\":\"...\"}. \
         Keep the professional marketing tone. No extra text, always valid JSON.\n\nDRAFTS:\n",
    );
    for (i, draft) in drafts.iter().enumerate() {
        prompt.push_str(&format!("[DRAFT {}]\n", i + 1));
        prompt.push_str(&serde_json::to_string_pretty(draft).unwrap_or_default());
        prompt.push_str("\n\n");
    }
    prompt.push_str(&format!("Subject hint: {subject_hint}\n\nFINAL_JSON:"));
    prompt
}

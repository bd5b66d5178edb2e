//! Single-shot schema repair for stage calls
//!
//! A schema violation means the model answered but not in the shape the
//! stage requires. Each stage gets exactly one repair retry: the same
//! request resent with a JSON-only instruction and a reduced token
//! budget. A second violation stands and the stage decides what it
//! means.

use tracing::debug;

use convoke_llm::{CallExecutor, CallRequest, CallResult};
use convoke_utils::error::CallFailure;

const REPAIR_INSTRUCTIONS: &str =
    "\n\nYour previous reply was not valid. Return EXACTLY one JSON object matching the requested shape. No prose, no code fences, nothing else.";

/// Execute `request`, retrying once with repair instructions if the
/// response fails schema validation. Returns the final result plus the
/// first (violating) result when a repair was attempted, so the caller
/// can record both calls.
pub(crate) async fn execute_with_repair(
    executor: &CallExecutor,
    request: &CallRequest,
    repair_max_tokens: u32,
) -> (CallResult, Option<CallResult>) {
    let first = executor.execute(request).await;
    let reason = match first.failure() {
        Some(CallFailure::SchemaViolation(reason)) => reason.clone(),
        _ => return (first, None),
    };

    debug!(
        stage = %request.stage,
        reason = %reason,
        "Schema violation, retrying once with repair instructions"
    );

    let repair_request = request.with_prompt(
        format!("{}{}", request.prompt, REPAIR_INSTRUCTIONS),
        repair_max_tokens.min(request.max_output_tokens).max(1),
    );
    let repaired = executor.execute(&repair_request).await;
    (repaired, Some(first))
}

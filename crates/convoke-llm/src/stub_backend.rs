//! Deterministic stub backend
//!
//! Used for dry runs and tests: no network, no keys consumed, canned
//! payloads keyed off the requesting stage and a few prompt markers.
//! Draft responses vary per invocation so the merge stage has something
//! real to reconcile.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use convoke_utils::error::ModelError;
use convoke_utils::types::Stage;

use crate::types::{ModelBackend, ModelRequest, ModelResponse};

pub struct StubBackend {
    draft_counter: AtomicU32,
}

impl StubBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            draft_counter: AtomicU32::new(0),
        }
    }

    fn plan_for(prompt: &str) -> String {
        if prompt.contains("high_cpa") || prompt.contains("CPA") || prompt.contains("cost increase")
        {
            return r#"{"actions":[
                {"action_type":"adjust_budget","details":{"campaign_id":"leadgen_nov","adjustment":-0.2},"reason":"Reduce spend to control CPA","confidence":0.7},
                {"action_type":"create_task","details":{"task":"Investigate creatives for leadgen_nov","assignee":"marketing_lead"},"reason":"Possible creative fatigue","confidence":0.5}
            ],"summary":"Contain CPA while creatives are reviewed"}"#
                .to_string();
        }
        if prompt.contains("overload") || prompt.contains("overloaded") {
            return r#"{"actions":[
                {"action_type":"reassign_task","details":{"task_id":"t123","from":"dev_ajay","to":"dev_sana"},"reason":"Balance load","confidence":0.8},
                {"action_type":"draft_email","details":{"to":"client@example.com"},"reason":"Client needs a timeline update","confidence":0.6}
            ],"summary":"Rebalance the team and warn the client"}"#
                .to_string();
        }
        r#"{"actions":[
            {"action_type":"create_task","details":{"task":"Review campaign performance","assignee":"marketing_lead"},"reason":"Periodic check","confidence":0.9}
        ],"summary":"Routine performance review"}"#
            .to_string()
    }

    fn draft_for(&self, prompt: &str) -> String {
        let n = self.draft_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let angle = match n % 3 {
            1 => "We recommend a short 3-day extension to protect quality.",
            2 => "Performance held steady this week; the plan below keeps momentum.",
            _ => "We propose a small budget shift toward the strongest creative.",
        };
        let subject = if prompt.contains("Subject hint:") {
            "Campaign update"
        } else {
            "Weekly update"
        };
        format!(
            r#"{{"to":"client@example.com","subject":"{subject} (draft {n})","body":"Hi,\n\n{angle}\n\nBest regards,\nThe team"}}"#
        )
    }

    fn merged_for() -> String {
        r#"{"to":"client@example.com","subject":"Campaign update","body":"Hi,\n\nHere is a consolidated view of where the campaign stands and the adjustments we recommend this week.\n\nBest regards,\nThe team"}"#
            .to_string()
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelBackend for StubBackend {
    async fn invoke(&self, _key: &str, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let raw = match request.stage {
            Stage::Planning => Self::plan_for(&request.prompt),
            Stage::Drafting => self.draft_for(&request.prompt),
            Stage::Merging => Self::merged_for(),
            other => {
                return Err(ModelError::Misconfiguration(format!(
                    "stub backend asked to serve non-calling stage {other}"
                )));
            }
        };
        Ok(ModelResponse {
            raw,
            provider: "stub".to_string(),
            model_used: request.model.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn request(stage: Stage, prompt: &str) -> ModelRequest {
        ModelRequest {
            scenario_id: "test".into(),
            stage,
            prompt: prompt.into(),
            model: "stub-model".into(),
            max_output_tokens: 400,
            temperature: 0.2,
        }
    }

    #[tokio::test]
    async fn plan_responses_validate_against_plan_schema() {
        let backend = StubBackend::new();
        for prompt in ["high_cpa in leadgen_nov", "dev team overloaded", "anything else"] {
            let response = backend
                .invoke("k", &request(Stage::Planning, prompt))
                .await
                .unwrap();
            schema::validate(Stage::Planning, &response.raw).unwrap();
        }
    }

    #[tokio::test]
    async fn drafts_vary_between_invocations() {
        let backend = StubBackend::new();
        let a = backend
            .invoke("k", &request(Stage::Drafting, "Subject hint: update"))
            .await
            .unwrap();
        let b = backend
            .invoke("k", &request(Stage::Drafting, "Subject hint: update"))
            .await
            .unwrap();
        assert_ne!(a.raw, b.raw);
        schema::validate(Stage::Drafting, &a.raw).unwrap();
        schema::validate(Stage::Drafting, &b.raw).unwrap();
    }

    #[tokio::test]
    async fn merge_response_validates() {
        let backend = StubBackend::new();
        let response = backend
            .invoke("k", &request(Stage::Merging, "DRAFTS: ..."))
            .await
            .unwrap();
        schema::validate(Stage::Merging, &response.raw).unwrap();
    }

    #[tokio::test]
    async fn non_calling_stage_is_an_error() {
        let backend = StubBackend::new();
        assert!(
            backend
                .invoke("k", &request(Stage::TaskDerivation, ""))
                .await
                .is_err()
        );
    }
}

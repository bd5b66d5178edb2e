//! Stage-specific response schemas and validation
//!
//! A response that reaches this module already made it over the wire;
//! everything that goes wrong here is payload-side. Validation failures
//! become `SchemaViolation`, which is a different animal from a
//! transport or credential failure and never counts against the
//! credential that served the call.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use convoke_utils::types::Stage;

use crate::types::StagePayload;

/// One proposed action out of the planning stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanAction {
    pub action_type: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub reason: String,
    pub confidence: f64,
}

/// The planning stage's structured output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<PlanAction>,
    #[serde(default)]
    pub summary: String,
}

impl Plan {
    /// Lowest confidence across the plan's actions (1.0 for an empty plan).
    #[must_use]
    pub fn min_confidence(&self) -> f64 {
        self.actions
            .iter()
            .map(|a| a.confidence)
            .fold(1.0, f64::min)
    }

    /// Actions below the given confidence threshold, for the gate's
    /// operator-facing summary.
    #[must_use]
    pub fn low_confidence_actions(&self, threshold: f64) -> Vec<&PlanAction> {
        self.actions
            .iter()
            .filter(|a| a.confidence < threshold)
            .collect()
    }
}

/// A drafted (or merged) client email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailDraft {
    #[serde(default = "default_recipient")]
    pub to: String,
    pub subject: String,
    pub body: String,
}

fn default_recipient() -> String {
    "client@example.com".to_string()
}

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fenced JSON pattern is valid")
});

/// Pull the first JSON object out of raw model text.
///
/// Tries fenced ```json blocks first, then falls back to the outermost
/// brace span. Models wrap JSON in prose often enough that going
/// straight to `serde_json` would reject plenty of usable responses.
#[must_use]
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    if let Some(captures) = FENCED_JSON.captures(text)
        && let Ok(value) = serde_json::from_str(&captures[1])
    {
        return Some(value);
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Validate a raw response against the schema for `stage`.
///
/// # Errors
///
/// Returns a human-readable reason string; the caller wraps it into
/// `CallFailure::SchemaViolation`.
pub fn validate(stage: Stage, raw: &str) -> Result<StagePayload, String> {
    let value = extract_json(raw).ok_or_else(|| "no JSON object found in response".to_string())?;

    match stage {
        Stage::Planning => {
            let plan: Plan = serde_json::from_value(value)
                .map_err(|e| format!("plan does not match schema: {e}"))?;
            for action in &plan.actions {
                if !(0.0..=1.0).contains(&action.confidence) {
                    return Err(format!(
                        "action '{}' has confidence {} outside [0, 1]",
                        action.action_type, action.confidence
                    ));
                }
            }
            Ok(StagePayload::Plan(plan))
        }
        Stage::Drafting | Stage::Merging => {
            let draft: EmailDraft = serde_json::from_value(value)
                .map_err(|e| format!("email does not match schema: {e}"))?;
            if draft.body.trim().is_empty() {
                return Err("email body is empty".to_string());
            }
            let payload = if stage == Stage::Merging {
                StagePayload::Merged(draft)
            } else {
                StagePayload::Draft(draft)
            };
            Ok(payload)
        }
        other => Err(format!("stage {other} does not make model calls")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN_JSON: &str = r#"{
        "actions": [
            {"action_type": "adjust_budget", "details": {"campaign_id": "leadgen_nov", "adjustment": -0.2}, "reason": "Reduce spend to control CPA", "confidence": 0.7},
            {"action_type": "create_task", "details": {"task": "Investigate creatives"}, "reason": "Possible creative fatigue", "confidence": 0.5}
        ],
        "summary": "Contain CPA while investigating creatives"
    }"#;

    #[test]
    fn parses_bare_plan_json() {
        let payload = validate(Stage::Planning, PLAN_JSON).unwrap();
        let StagePayload::Plan(plan) = payload else {
            panic!("expected plan payload");
        };
        assert_eq!(plan.actions.len(), 2);
        assert_eq!(plan.actions[0].action_type, "adjust_budget");
        assert!((plan.min_confidence() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn extracts_json_from_fenced_block() {
        let wrapped = format!("Here is the plan you asked for:\n```json\n{PLAN_JSON}\n```\nDone.");
        assert!(validate(Stage::Planning, &wrapped).is_ok());
    }

    #[test]
    fn extracts_json_from_surrounding_prose() {
        let wrapped = format!("Sure! {PLAN_JSON} Let me know if you need changes.");
        assert!(validate(Stage::Planning, &wrapped).is_ok());
    }

    #[test]
    fn rejects_response_without_json() {
        let err = validate(Stage::Planning, "I could not produce a plan.").unwrap_err();
        assert!(err.contains("no JSON object"));
    }

    #[test]
    fn rejects_confidence_out_of_range() {
        let raw = r#"{"actions":[{"action_type":"x","reason":"r","confidence":1.4}],"summary":""}"#;
        let err = validate(Stage::Planning, raw).unwrap_err();
        assert!(err.contains("outside [0, 1]"));
    }

    #[test]
    fn drafting_requires_nonempty_body() {
        let raw = r#"{"to":"client@example.com","subject":"Update","body":"  "}"#;
        let err = validate(Stage::Drafting, raw).unwrap_err();
        assert!(err.contains("body is empty"));
    }

    #[test]
    fn drafting_defaults_missing_recipient() {
        let raw = r#"{"subject":"Timeline update","body":"We recommend a 3-day extension."}"#;
        let StagePayload::Draft(draft) = validate(Stage::Drafting, raw).unwrap() else {
            panic!("expected draft payload");
        };
        assert_eq!(draft.to, "client@example.com");
    }

    #[test]
    fn merging_produces_merged_payload() {
        let raw = r#"{"to":"a@b.c","subject":"s","body":"b"}"#;
        assert!(matches!(
            validate(Stage::Merging, raw).unwrap(),
            StagePayload::Merged(_)
        ));
    }

    #[test]
    fn non_calling_stages_are_rejected() {
        let raw = r#"{"subject":"s","body":"b"}"#;
        assert!(validate(Stage::TaskDerivation, raw).is_err());
        assert!(validate(Stage::Output, raw).is_err());
    }

    #[test]
    fn low_confidence_actions_filters_by_threshold() {
        let StagePayload::Plan(plan) = validate(Stage::Planning, PLAN_JSON).unwrap() else {
            panic!("expected plan payload");
        };
        let low = plan.low_confidence_actions(0.75);
        assert_eq!(low.len(), 2);
        let low = plan.low_confidence_actions(0.6);
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].action_type, "create_task");
    }
}

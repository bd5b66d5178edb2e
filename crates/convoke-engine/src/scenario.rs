//! Scenario input for a run

use serde::{Deserialize, Serialize};

/// The marketing scenario a run works on.
///
/// Loaded from a JSON file by the CLI; carried inside the [`RunRecord`]
/// so an exported run can be resumed without the original file.
///
/// [`RunRecord`]: crate::record::RunRecord
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario identifier, also the key into the budget table.
    pub id: String,
    /// Free-form situation notes fed into planning and drafting prompts.
    pub notes: String,
    /// Optional subject hint for the drafted email.
    #[serde(default)]
    pub subject_hint: Option<String>,
    /// Optional recipient override for the drafted email.
    #[serde(default)]
    pub recipient: Option<String>,
}

impl Scenario {
    #[must_use]
    pub fn new(id: impl Into<String>, notes: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            notes: notes.into(),
            subject_hint: None,
            recipient: None,
        }
    }

    /// Subject hint, defaulting to "<id> update" as the drafts expect.
    #[must_use]
    pub fn subject_hint_or_default(&self) -> String {
        self.subject_hint
            .clone()
            .unwrap_or_else(|| format!("{} update", self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_json() {
        let scenario: Scenario =
            serde_json::from_str(r#"{"id":"campaign_spike","notes":"CPA doubled overnight"}"#)
                .unwrap();
        assert_eq!(scenario.id, "campaign_spike");
        assert_eq!(scenario.subject_hint, None);
        assert_eq!(scenario.subject_hint_or_default(), "campaign_spike update");
    }
}

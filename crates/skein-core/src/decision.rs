//! Decision points -- structured human-in-the-loop gates.
//!
//! A `gate` issue may carry one decision point. Downstream work that depends
//! on the gate stays blocked until somebody records a response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One selectable answer on a decision point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOption {
    /// Stable option identifier (referenced by `selected_option`).
    pub id: String,

    /// Short hotkey-style form, e.g. "y".
    pub short: String,

    /// Human-readable label.
    pub label: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// A human gate attached to a `gate`-typed issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionPoint {
    /// Question put to the human.
    pub prompt: String,

    /// Ordered list of choices.
    pub options: Vec<DecisionOption>,

    /// Option id picked when the human just confirms.
    pub default_option: String,

    /// 1-based iteration counter; a re-asked gate links its predecessor.
    pub iteration: i32,

    pub max_iterations: i32,

    /// Gate issue id of the previous iteration, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_id: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub guidance: String,

    // -- Response -----------------------------------------------------------
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_option: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response_text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub responded_by: String,
}

impl DecisionPoint {
    /// Returns `true` once a response has been recorded.
    pub fn is_answered(&self) -> bool {
        self.selected_option.is_some()
    }

    /// Looks up an option by id.
    pub fn option(&self, id: &str) -> Option<&DecisionOption> {
        self.options.iter().find(|o| o.id == id)
    }

    /// Structural sanity: the default (and any selection) must name a real
    /// option, and the iteration counter must be inside 1..=max.
    pub fn is_well_formed(&self) -> bool {
        if self.options.is_empty() || self.option(&self.default_option).is_none() {
            return false;
        }
        if self.iteration < 1 || self.iteration > self.max_iterations {
            return false;
        }
        match &self.selected_option {
            Some(sel) => self.option(sel).is_some(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> DecisionPoint {
        DecisionPoint {
            prompt: "Ship the migration?".into(),
            options: vec![
                DecisionOption {
                    id: "yes".into(),
                    short: "y".into(),
                    label: "Ship it".into(),
                    description: String::new(),
                },
                DecisionOption {
                    id: "no".into(),
                    short: "n".into(),
                    label: "Hold".into(),
                    description: "Keep the old schema".into(),
                },
            ],
            default_option: "no".into(),
            iteration: 1,
            max_iterations: 3,
            prior_id: None,
            guidance: String::new(),
            selected_option: None,
            response_text: String::new(),
            responded_at: None,
            responded_by: String::new(),
        }
    }

    #[test]
    fn unanswered_gate_is_well_formed() {
        let g = gate();
        assert!(g.is_well_formed());
        assert!(!g.is_answered());
    }

    #[test]
    fn answered_gate() {
        let mut g = gate();
        g.selected_option = Some("yes".into());
        g.responded_by = "alice".into();
        g.responded_at = Some(Utc::now());
        assert!(g.is_answered());
        assert!(g.is_well_formed());
    }

    #[test]
    fn selection_must_name_real_option() {
        let mut g = gate();
        g.selected_option = Some("maybe".into());
        assert!(!g.is_well_formed());
    }

    #[test]
    fn default_must_name_real_option() {
        let mut g = gate();
        g.default_option = "maybe".into();
        assert!(!g.is_well_formed());
    }

    #[test]
    fn iteration_bounds() {
        let mut g = gate();
        g.iteration = 4;
        assert!(!g.is_well_formed());
        g.iteration = 0;
        assert!(!g.is_well_formed());
    }

    #[test]
    fn serde_roundtrip() {
        let g = gate();
        let json = serde_json::to_string(&g).unwrap();
        let back: DecisionPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g);
        // Unset response fields are omitted on the wire.
        assert!(!json.contains("selected_option"));
        assert!(!json.contains("responded_at"));
    }
}

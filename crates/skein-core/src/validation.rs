//! Write-time validation rules for the issue model.

use crate::enums::Status;
use crate::issue::Issue;

/// Longest accepted title, in bytes.
pub const MAX_TITLE_BYTES: usize = 256;

/// Longest accepted label, in bytes.
pub const MAX_LABEL_BYTES: usize = 32;

/// Error type for validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("title is required")]
    TitleRequired,

    #[error("title must be {MAX_TITLE_BYTES} bytes or less (got {0})")]
    TitleTooLong(usize),

    #[error("priority must be between 0 and 4 (got {0})")]
    InvalidPriority(i32),

    #[error("status '{0}' is not built in and not declared in config")]
    InvalidStatus(String),

    #[error("issue type '{0}' is not built in and not declared in config")]
    InvalidIssueType(String),

    #[error("closed issues must carry closed_at")]
    ClosedWithoutTimestamp,

    #[error("non-closed issues cannot carry closed_at")]
    NotClosedWithTimestamp,

    #[error("label '{0}' exceeds {MAX_LABEL_BYTES} bytes")]
    LabelTooLong(String),

    #[error("metadata is not a JSON object")]
    MetadataNotObject,

    #[error("metadata key '{0}' is not a valid identifier")]
    BadMetadataKey(String),

    #[error("decision point is malformed")]
    BadDecision,

    #[error("only gate issues may carry a decision point")]
    DecisionOnNonGate,
}

/// Validates an issue with no project-declared extensions.
pub fn validate(issue: &Issue) -> Result<(), ValidationError> {
    validate_with(issue, &[], &[])
}

/// Validates an issue, admitting config-declared custom statuses and types.
pub fn validate_with(
    issue: &Issue,
    custom_statuses: &[String],
    custom_types: &[String],
) -> Result<(), ValidationError> {
    if issue.title.is_empty() {
        return Err(ValidationError::TitleRequired);
    }
    if issue.title.len() > MAX_TITLE_BYTES {
        return Err(ValidationError::TitleTooLong(issue.title.len()));
    }
    if !(0..=4).contains(&issue.priority) {
        return Err(ValidationError::InvalidPriority(issue.priority));
    }
    if !issue.status.is_valid_with(custom_statuses) {
        return Err(ValidationError::InvalidStatus(
            issue.status.as_str().to_owned(),
        ));
    }
    if !issue.issue_type.is_valid_with(custom_types) {
        return Err(ValidationError::InvalidIssueType(
            issue.issue_type.as_str().to_owned(),
        ));
    }
    if issue.status == Status::Closed && issue.closed_at.is_none() {
        return Err(ValidationError::ClosedWithoutTimestamp);
    }
    if issue.status != Status::Closed && issue.closed_at.is_some() {
        return Err(ValidationError::NotClosedWithTimestamp);
    }
    for label in &issue.labels {
        if label.len() > MAX_LABEL_BYTES {
            return Err(ValidationError::LabelTooLong(label.clone()));
        }
    }
    if let Some(ref meta) = issue.metadata {
        normalize_metadata(meta.get())?;
    }
    if let Some(ref decision) = issue.decision {
        if !issue.issue_type.is_gate() {
            return Err(ValidationError::DecisionOnNonGate);
        }
        if !decision.is_well_formed() {
            return Err(ValidationError::BadDecision);
        }
    }
    Ok(())
}

/// Normalises a label: trimmed and lowercased.
pub fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

/// The metadata normaliser: parses, checks every top-level key against
/// `[A-Za-z_][A-Za-z0-9_.]*`, and re-emits compact JSON.
///
/// All metadata mutations round-trip through here, so stored blobs are
/// always valid and key-checked.
pub fn normalize_metadata(raw: &str) -> Result<String, ValidationError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|_| ValidationError::MetadataNotObject)?;
    let map = value
        .as_object()
        .ok_or(ValidationError::MetadataNotObject)?;
    for key in map.keys() {
        if !is_valid_metadata_key(key) {
            return Err(ValidationError::BadMetadataKey(key.clone()));
        }
    }
    Ok(serde_json::to_string(&value).expect("re-emitting parsed JSON"))
}

/// Matches `^[A-Za-z_][A-Za-z0-9_.]*$` without pulling in a regex engine.
pub fn is_valid_metadata_key(key: &str) -> bool {
    let mut bytes = key.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphabetic() || b == b'_' => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{DecisionOption, DecisionPoint};
    use crate::enums::IssueType;
    use crate::issue::IssueBuilder;

    #[test]
    fn valid_issue_passes() {
        let issue = IssueBuilder::new("Valid").priority(2).build();
        assert!(validate(&issue).is_ok());
    }

    #[test]
    fn empty_title_fails() {
        let issue = IssueBuilder::new("").build();
        assert!(matches!(validate(&issue), Err(ValidationError::TitleRequired)));
    }

    #[test]
    fn oversize_title_fails() {
        let issue = IssueBuilder::new("x".repeat(257)).build();
        assert!(matches!(
            validate(&issue),
            Err(ValidationError::TitleTooLong(257))
        ));
    }

    #[test]
    fn priority_bounds() {
        assert!(matches!(
            validate(&IssueBuilder::new("t").priority(5).build()),
            Err(ValidationError::InvalidPriority(5))
        ));
        assert!(matches!(
            validate(&IssueBuilder::new("t").priority(-1).build()),
            Err(ValidationError::InvalidPriority(-1))
        ));
    }

    #[test]
    fn custom_status_needs_declaration() {
        let issue = IssueBuilder::new("t")
            .status(Status::Custom("needs_review".into()))
            .build();
        assert!(matches!(
            validate(&issue),
            Err(ValidationError::InvalidStatus(_))
        ));
        assert!(validate_with(&issue, &["needs_review".into()], &[]).is_ok());
    }

    #[test]
    fn closed_at_invariants() {
        let closed_no_ts = IssueBuilder::new("t").status(Status::Closed).build();
        assert!(matches!(
            validate(&closed_no_ts),
            Err(ValidationError::ClosedWithoutTimestamp)
        ));

        let open_with_ts = IssueBuilder::new("t").closed_at(chrono::Utc::now()).build();
        assert!(matches!(
            validate(&open_with_ts),
            Err(ValidationError::NotClosedWithTimestamp)
        ));
    }

    #[test]
    fn metadata_keys_checked() {
        assert!(is_valid_metadata_key("agent_run.id"));
        assert!(is_valid_metadata_key("_internal"));
        assert!(!is_valid_metadata_key("9lives"));
        assert!(!is_valid_metadata_key("spaced key"));
        assert!(!is_valid_metadata_key(""));

        assert!(normalize_metadata(r#"{"ok_key": 1}"#).is_ok());
        assert!(matches!(
            normalize_metadata(r#"{"bad key": 1}"#),
            Err(ValidationError::BadMetadataKey(_))
        ));
        assert!(matches!(
            normalize_metadata(r#"[1,2]"#),
            Err(ValidationError::MetadataNotObject)
        ));
        assert!(matches!(
            normalize_metadata("not json"),
            Err(ValidationError::MetadataNotObject)
        ));
    }

    #[test]
    fn label_length() {
        let issue = IssueBuilder::new("t")
            .labels(vec!["x".repeat(33)])
            .build();
        assert!(matches!(
            validate(&issue),
            Err(ValidationError::LabelTooLong(_))
        ));
    }

    #[test]
    fn normalize_label_lowercases() {
        assert_eq!(normalize_label("  Tech-Debt "), "tech-debt");
    }

    #[test]
    fn decision_only_on_gates() {
        let dp = DecisionPoint {
            prompt: "?".into(),
            options: vec![DecisionOption {
                id: "a".into(),
                short: "a".into(),
                label: "A".into(),
                description: String::new(),
            }],
            default_option: "a".into(),
            iteration: 1,
            max_iterations: 1,
            prior_id: None,
            guidance: String::new(),
            selected_option: None,
            response_text: String::new(),
            responded_at: None,
            responded_by: String::new(),
        };

        let on_task = IssueBuilder::new("t").decision(dp.clone()).build();
        assert!(matches!(
            validate(&on_task),
            Err(ValidationError::DecisionOnNonGate)
        ));

        let on_gate = IssueBuilder::new("t")
            .issue_type(IssueType::Gate)
            .decision(dp)
            .build();
        assert!(validate(&on_gate).is_ok());
    }
}

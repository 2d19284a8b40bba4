//! Field mapping between an issue and its tracker twin.
//!
//! The neutral [`RemoteIssue`] record is what tracker plug-ins exchange:
//! this side owns the translation rules, the plug-ins own the transport.

use serde::{Deserialize, Serialize};

use skein_core::enums::Status;
use skein_core::issue::Issue;
use skein_core::validation::normalize_label;

/// The state model most trackers share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteState {
    Open,
    Closed,
}

/// A tracker-neutral issue record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteIssue {
    /// Provider-shaped key (`owner/repo#123`, `PROJ-42`...).
    pub key: String,
    /// Canonicalised URL of the twin.
    pub url: String,
    pub title: String,
    pub body: String,
    pub state: RemoteState,
    /// Labels, including the priority marker.
    pub labels: Vec<String>,
}

/// Label used to carry priority through trackers that have no numeric
/// priority field: `P0`..`P4`.
fn priority_label(priority: i32) -> String {
    format!("P{priority}")
}

fn parse_priority_label(label: &str) -> Option<i32> {
    let rest = label.strip_prefix('P').or_else(|| label.strip_prefix('p'))?;
    let n: i32 = rest.parse().ok()?;
    (0..=4).contains(&n).then_some(n)
}

/// Renders an issue as the neutral record its tracker twin should show.
pub fn to_remote(issue: &Issue, key: &str, url: &str) -> RemoteIssue {
    let mut labels: Vec<String> = issue.labels.clone();
    labels.push(priority_label(issue.priority));
    labels.sort();
    labels.dedup();

    RemoteIssue {
        key: key.to_string(),
        url: url.to_string(),
        title: issue.title.clone(),
        body: issue.description.clone(),
        state: if issue.is_closed() {
            RemoteState::Closed
        } else {
            RemoteState::Open
        },
        labels,
    }
}

/// Folds a remote record back into an issue: title, body, state, labels and
/// the priority marker. Engine-only fields (design, notes, dependencies,
/// decision) are never touched by remote state.
pub fn apply_remote(issue: &mut Issue, remote: &RemoteIssue) {
    issue.title = remote.title.clone();
    issue.description = remote.body.clone();
    issue.external_ref = Some(remote.url.clone());

    match remote.state {
        RemoteState::Closed if !issue.is_closed() => {
            issue.status = Status::Closed;
            issue.closed_at = Some(chrono::Utc::now());
        }
        RemoteState::Open if issue.is_closed() => {
            issue.status = Status::Open;
            issue.closed_at = None;
        }
        _ => {}
    }

    let mut labels = Vec::new();
    for label in &remote.labels {
        if let Some(priority) = parse_priority_label(label) {
            issue.priority = priority;
        } else {
            labels.push(normalize_label(label));
        }
    }
    labels.sort();
    labels.dedup();
    issue.labels = labels;
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::issue::IssueBuilder;

    #[test]
    fn to_remote_carries_priority_as_label() {
        let issue = IssueBuilder::new("Ship it")
            .id("sk-r1")
            .priority(1)
            .description("the body")
            .labels(vec!["backend".into()])
            .build();
        let remote = to_remote(&issue, "acme/widgets#42", "https://github.com/acme/widgets/issues/42");

        assert_eq!(remote.title, "Ship it");
        assert_eq!(remote.state, RemoteState::Open);
        assert!(remote.labels.contains(&"P1".to_string()));
        assert!(remote.labels.contains(&"backend".to_string()));
    }

    #[test]
    fn closed_issue_maps_to_closed_state() {
        let mut issue = IssueBuilder::new("Done").id("sk-r2").build();
        issue.status = Status::Closed;
        issue.closed_at = Some(chrono::Utc::now());
        let remote = to_remote(&issue, "k", "u");
        assert_eq!(remote.state, RemoteState::Closed);
    }

    #[test]
    fn apply_remote_roundtrips_fields() {
        let mut issue = IssueBuilder::new("Old title").id("sk-r3").priority(3).build();
        let remote = RemoteIssue {
            key: "PROJ-7".into(),
            url: "https://acme.atlassian.net/browse/PROJ-7".into(),
            title: "New title".into(),
            body: "new body".into(),
            state: RemoteState::Closed,
            labels: vec!["P0".into(), "Infra".into()],
        };

        apply_remote(&mut issue, &remote);
        assert_eq!(issue.title, "New title");
        assert_eq!(issue.priority, 0);
        assert_eq!(issue.labels, vec!["infra"]);
        assert_eq!(issue.status, Status::Closed);
        assert!(issue.closed_at.is_some());
        assert_eq!(
            issue.external_ref.as_deref(),
            Some("https://acme.atlassian.net/browse/PROJ-7")
        );
    }

    #[test]
    fn reopen_from_remote_clears_close_marker() {
        let mut issue = IssueBuilder::new("t").id("sk-r4").build();
        issue.status = Status::Closed;
        issue.closed_at = Some(chrono::Utc::now());

        let remote = RemoteIssue {
            key: "k".into(),
            url: "u".into(),
            title: "t".into(),
            body: String::new(),
            state: RemoteState::Open,
            labels: vec![],
        };
        apply_remote(&mut issue, &remote);
        assert_eq!(issue.status, Status::Open);
        assert!(issue.closed_at.is_none());
    }

    #[test]
    fn bogus_priority_labels_pass_through() {
        let mut issue = IssueBuilder::new("t").id("sk-r5").priority(2).build();
        let remote = RemoteIssue {
            key: "k".into(),
            url: "u".into(),
            title: "t".into(),
            body: String::new(),
            state: RemoteState::Open,
            labels: vec!["P9".into(), "pending".into()],
        };
        apply_remote(&mut issue, &remote);
        // P9 is out of range, "pending" is not a priority label.
        assert_eq!(issue.priority, 2);
        assert_eq!(issue.labels, vec!["p9", "pending"]);
    }
}

//! Filter types pushed down to the storage layer.

use chrono::{DateTime, Utc};

use crate::enums::{IssueType, Status};

/// Structured filter for `search` queries.
///
/// All fields are conjunctive. The query compiler lowers expressions into
/// this shape where it can, and falls back to a residual predicate where it
/// cannot.
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    /// Restrict to these statuses (empty = any).
    pub statuses: Vec<Status>,
    /// Exclude these statuses.
    pub exclude_statuses: Vec<Status>,

    /// Restrict to these types (empty = any).
    pub issue_types: Vec<IssueType>,

    pub priority: Option<i32>,
    pub priority_min: Option<i32>,
    pub priority_max: Option<i32>,

    pub assignee: Option<String>,
    pub owner: Option<String>,
    /// Only issues with no assignee.
    pub unassigned: bool,

    /// AND semantics: every label must be present.
    pub labels: Vec<String>,
    /// OR semantics: at least one label must be present.
    pub labels_any: Vec<String>,

    /// Restrict to specific ids.
    pub ids: Vec<String>,
    /// Restrict to ids starting with this prefix.
    pub id_prefix: Option<String>,
    /// Restrict to spec ids starting with this prefix.
    pub spec_prefix: Option<String>,

    pub pinned: Option<bool>,
    pub ephemeral: Option<bool>,
    pub is_template: Option<bool>,

    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,

    pub limit: Option<i32>,
}

/// Filter for the ready-work and blocked queries.
#[derive(Debug, Clone)]
pub struct WorkFilter {
    /// Statuses admitted to the result. The default admits work nobody has
    /// picked up: `open` and `blocked` (an issue marked blocked whose
    /// blockers have since closed is ready again).
    pub statuses: Vec<Status>,

    pub issue_type: Option<IssueType>,
    pub priority: Option<i32>,
    pub priority_max: Option<i32>,

    pub assignee: Option<String>,
    /// Only issues with no assignee.
    pub unassigned: bool,

    /// AND semantics.
    pub labels: Vec<String>,
    /// OR semantics.
    pub labels_any: Vec<String>,

    /// Restrict to spec ids starting with this prefix.
    pub spec_prefix: Option<String>,

    /// Include ephemeral issues (excluded by default).
    pub include_ephemeral: bool,

    pub limit: Option<i32>,
}

impl Default for WorkFilter {
    fn default() -> Self {
        Self {
            statuses: vec![Status::Open, Status::Blocked],
            issue_type: None,
            priority: None,
            priority_max: None,
            assignee: None,
            unassigned: false,
            labels: Vec::new(),
            labels_any: Vec::new(),
            spec_prefix: None,
            include_ephemeral: false,
            limit: None,
        }
    }
}

/// Filter for stale-issue queries.
#[derive(Debug, Clone)]
pub struct StaleFilter {
    /// Issues not updated in this many days.
    pub days: i64,
    pub status: Option<Status>,
    pub limit: Option<i32>,
}

impl Default for StaleFilter {
    fn default() -> Self {
        Self {
            days: 30,
            status: None,
            limit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_filter_default_is_empty() {
        let f = IssueFilter::default();
        assert!(f.statuses.is_empty());
        assert!(f.priority.is_none());
        assert!(!f.unassigned);
    }

    #[test]
    fn work_filter_default_admits_unstarted_work() {
        let f = WorkFilter::default();
        assert_eq!(f.statuses, vec![Status::Open, Status::Blocked]);
        assert!(!f.include_ephemeral);
    }
}

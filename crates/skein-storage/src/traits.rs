//! The `Storage` and `Transaction` traits -- the engine's only mutating
//! interface to persisted issues.
//!
//! Consumers depend on these traits, not on the SQLite backend, so mocks
//! and proxies (the daemon client among them) can stand in.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use skein_core::comment::{Comment, Event};
use skein_core::decision::DecisionPoint;
use skein_core::dependency::Dependency;
use skein_core::enums::{DependencyType, IssueType, Status};
use skein_core::filter::{IssueFilter, StaleFilter, WorkFilter};
use skein_core::issue::Issue;

use crate::error::Result;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Typed partial update for an issue.
///
/// Only `Some` fields apply. Clearable fields nest an `Option`: the outer
/// `Some` means "update", the inner value is the new state.
#[derive(Debug, Clone, Default)]
pub struct IssuePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub design: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub notes: Option<String>,
    pub spec_id: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<i32>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<String>,
    pub owner: Option<String>,
    pub external_ref: Option<Option<String>>,
    /// Raw JSON object; routed through the metadata normaliser.
    pub metadata: Option<Option<String>>,
    pub pinned: Option<bool>,
    pub ephemeral: Option<bool>,
    pub is_template: Option<bool>,
    pub decision: Option<Option<DecisionPoint>>,
}

impl IssuePatch {
    /// Whether the patch changes anything at all.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.design.is_none()
            && self.acceptance_criteria.is_none()
            && self.notes.is_none()
            && self.spec_id.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.issue_type.is_none()
            && self.assignee.is_none()
            && self.owner.is_none()
            && self.external_ref.is_none()
            && self.metadata.is_none()
            && self.pinned.is_none()
            && self.ephemeral.is_none()
            && self.is_template.is_none()
            && self.decision.is_none()
    }
}

/// How a batch create treats edges whose far end is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanMode {
    /// Reject the whole batch with `OrphanParent`.
    #[default]
    Strict,
    /// Drop the offending edge, keep the rest.
    Skip,
    /// Keep the edge, flagging the missing end as cross-store.
    Allow,
}

/// Options for `create_issues`.
#[derive(Debug, Clone, Default)]
pub struct CreateBatchOptions {
    pub orphan_mode: OrphanMode,
}

/// Options for `delete_issues`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    /// Also delete `parent-child` descendants, recursively.
    pub cascade: bool,
    /// Orphan dependents by removing their inbound edges instead of failing.
    pub force: bool,
    /// Compute the affected set without applying anything.
    pub dry_run: bool,
}

/// Everything the id allocator needs to mint one identifier.
#[derive(Debug, Clone)]
pub struct NewIdRequest {
    pub prefix: String,
    /// `true` = hash mode, `false` = sequential.
    pub hash_mode: bool,
    /// Starting suffix length for hash mode (3..=8).
    pub hash_length: usize,
    pub salt: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    /// When present, mint `{parent}.{n}` instead.
    pub parent: Option<String>,
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// A blocked issue annotated with its unresolved blockers.
#[derive(Debug, Clone)]
pub struct BlockedIssue {
    pub issue: Issue,
    /// The open issues this one is waiting on, via ready-affecting edges.
    pub blockers: Vec<Issue>,
}

/// Status breakdown of an epic's subtree.
#[derive(Debug, Clone, Default)]
pub struct EpicProgress {
    pub epic_id: String,
    pub total: i64,
    pub open: i64,
    pub in_progress: i64,
    pub blocked: i64,
    pub closed: i64,
}

impl EpicProgress {
    /// An epic is closeable once every descendant is closed.
    pub fn is_closeable(&self) -> bool {
        self.total > 0 && self.closed == self.total
    }
}

/// A node from a dependency tree traversal.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub issue: Issue,
    /// Depth from the root (0 = root).
    pub depth: i32,
    /// Type of the edge that led here.
    pub dep_type: DependencyType,
}

/// What an import-path upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Created,
    Updated,
    /// The stored issue was at least as new and content-identical.
    Unchanged,
}

/// Outcome of `delete_issues`.
#[derive(Debug, Clone, Default)]
pub struct DeleteOutcome {
    /// Ids actually (or, under `dry_run`, would-be) deleted.
    pub deleted: Vec<String>,
    /// Inbound edges removed to orphan surviving dependents (`force`).
    pub edges_removed: Vec<(String, String)>,
}

/// Aggregate statistics over the store.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub total_issues: i64,
    pub open_issues: i64,
    pub in_progress_issues: i64,
    pub blocked_issues: i64,
    pub closed_issues: i64,
    pub ready_issues: i64,
    /// `(type, count)` breakdown.
    pub by_type: Vec<(String, i64)>,
    /// `(priority, count)` breakdown.
    pub by_priority: Vec<(i32, i64)>,
}

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Primary persistence interface.
pub trait Storage: Send + Sync {
    // -- Issue CRUD ----------------------------------------------------------

    /// Persists a new issue, emits `created`, marks it dirty.
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()>;

    /// Creates a batch atomically under the given orphan policy, with a
    /// single post-pass cycle validation.
    fn create_issues(
        &self,
        issues: &[Issue],
        actor: &str,
        opts: &CreateBatchOptions,
    ) -> Result<()>;

    fn get_issue(&self, id: &str) -> Result<Issue>;

    /// Issue with labels, dependencies, comments and decision hydrated.
    fn get_issue_full(&self, id: &str) -> Result<Issue>;

    /// Every issue, fully hydrated, ordered by id. Export fodder.
    fn get_all_issues_full(&self) -> Result<Vec<Issue>>;

    fn get_issues_by_ids(&self, ids: &[String]) -> Result<Vec<Issue>>;

    fn get_issue_by_external_ref(&self, external_ref: &str) -> Result<Issue>;

    /// Applies a partial update; bumps `updated_at` monotonically; emits
    /// `updated`; marks dirty.
    fn update_issue(&self, id: &str, patch: &IssuePatch, actor: &str) -> Result<()>;

    /// Atomic claim: compare-and-set `assignee == "" -> actor`,
    /// `status -> in_progress`. Fails with `AlreadyClaimed` otherwise.
    fn claim_issue(&self, id: &str, actor: &str) -> Result<()>;

    /// Closes with a non-empty reason; sets `closed_at`; emits `closed`.
    fn close_issue(&self, id: &str, reason: &str, actor: &str, session: &str) -> Result<()>;

    /// Reopens a closed issue, clearing `closed_at`; emits `reopened`.
    fn reopen_issue(&self, id: &str, actor: &str) -> Result<()>;

    /// Deletes issues per the cascade/force/dry-run semantics, logging
    /// `deleted` events for applied deletions.
    fn delete_issues(
        &self,
        ids: &[String],
        opts: &DeleteOptions,
        actor: &str,
    ) -> Result<DeleteOutcome>;

    /// Text search over title/description/notes plus a structured filter.
    /// Ordered by priority, then `updated_at` desc, then id.
    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>>;

    // -- Identifiers ---------------------------------------------------------

    /// Mints a fresh unused id per the request (sequential, hash with
    /// collision resampling/widening, or child-of-parent).
    fn allocate_id(&self, req: &NewIdRequest) -> Result<String>;

    /// Renames an issue, rewriting every dependency endpoint, atomically.
    fn update_issue_id(&self, old_id: &str, new_id: &str, actor: &str) -> Result<()>;

    // -- Dependencies --------------------------------------------------------

    /// Adds an edge; rejects duplicates and ready-graph cycles.
    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()>;

    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()>;

    /// Issues this one depends on (outgoing edges).
    fn get_dependencies(&self, issue_id: &str) -> Result<Vec<Issue>>;

    /// Issues depending on this one (incoming edges).
    fn get_dependents(&self, issue_id: &str) -> Result<Vec<Issue>>;

    /// Raw outgoing edge records.
    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>>;

    /// Every edge record in the store, keyed by source issue.
    fn get_all_dependency_records(&self) -> Result<HashMap<String, Vec<Dependency>>>;

    /// Breadth-first dependency tree from a root.
    fn get_dependency_tree(
        &self,
        issue_id: &str,
        max_depth: i32,
        reverse: bool,
    ) -> Result<Vec<TreeNode>>;

    /// Full-graph scan: every cycle in the ready-affecting subgraph, each as
    /// ids in traversal order.
    fn detect_cycles(&self) -> Result<Vec<Vec<String>>>;

    // -- Labels --------------------------------------------------------------

    /// Idempotent; emits `label_added` only on change.
    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;

    /// Idempotent; emits `label_removed` only on change.
    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>>;

    fn get_issues_by_label(&self, label: &str) -> Result<Vec<Issue>>;

    // -- Work queries --------------------------------------------------------

    /// Issues whose ready-affecting blockers are all closed and that the
    /// filter admits. Ordered: priority asc, pinned desc, updated desc, id.
    fn get_ready_work(&self, filter: &WorkFilter) -> Result<Vec<Issue>>;

    /// Issues with at least one open ready-affecting blocker, annotated.
    fn get_blocked(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>>;

    /// Status counts over an epic's `parent-child` subtree.
    fn get_epic_progress(&self, epic_id: &str) -> Result<EpicProgress>;

    /// Epics whose entire subtree is closed.
    fn epics_eligible_for_closure(&self) -> Result<Vec<EpicProgress>>;

    /// Issues untouched for the filter's window.
    fn get_stale_issues(&self, filter: &StaleFilter) -> Result<Vec<Issue>>;

    // -- Comments and events -------------------------------------------------

    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment>;

    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>>;

    fn get_events(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>>;

    fn get_all_events_since(&self, since_id: i64) -> Result<Vec<Event>>;

    // -- Statistics ----------------------------------------------------------

    fn get_statistics(&self) -> Result<Statistics>;

    // -- Dirty tracking & export hashes --------------------------------------

    /// Ids mutated since their last successful export.
    fn get_dirty_issues(&self) -> Result<Vec<String>>;

    fn clear_dirty_issues_by_id(&self, ids: &[String]) -> Result<()>;

    /// Marks every issue dirty (full re-export).
    fn mark_all_dirty(&self) -> Result<()>;

    fn get_export_hash(&self, issue_id: &str) -> Result<Option<String>>;

    fn set_export_hash(&self, issue_id: &str, content_hash: &str) -> Result<()>;

    fn clear_export_hashes(&self) -> Result<()>;

    // -- Config and engine metadata ------------------------------------------

    fn set_config(&self, key: &str, value: &str) -> Result<()>;

    fn get_config(&self, key: &str) -> Result<Option<String>>;

    fn get_all_config(&self) -> Result<HashMap<String, String>>;

    fn set_metadata(&self, key: &str, value: &str) -> Result<()>;

    fn get_metadata(&self, key: &str) -> Result<Option<String>>;

    // -- Transactions --------------------------------------------------------

    /// Runs `f` inside a write transaction (`BEGIN IMMEDIATE`). Commit on
    /// `Ok`, rollback on error or unwind. Reads inside see the writer's
    /// uncommitted state.
    fn run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()>;

    // -- Lifecycle -----------------------------------------------------------

    /// Flushes and releases the backend, bounded so teardown cannot hang.
    fn close(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Transaction trait
// ---------------------------------------------------------------------------

/// The mutating subset of [`Storage`] available inside a transaction.
pub trait Transaction {
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()>;
    fn update_issue(&self, id: &str, patch: &IssuePatch, actor: &str) -> Result<()>;
    fn close_issue(&self, id: &str, reason: &str, actor: &str, session: &str) -> Result<()>;
    fn delete_issue(&self, id: &str) -> Result<()>;
    fn get_issue(&self, id: &str) -> Result<Issue>;
    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>>;
    fn update_issue_id(&self, old_id: &str, new_id: &str, actor: &str) -> Result<()>;

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()>;
    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()>;
    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>>;

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;
    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;
    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>>;

    /// Inserts a comment preserving its original timestamp (import path).
    fn import_comment(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment>;
    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>>;

    fn set_config(&self, key: &str, value: &str) -> Result<()>;
    fn get_config(&self, key: &str) -> Result<Option<String>>;
    fn set_metadata(&self, key: &str, value: &str) -> Result<()>;
    fn get_metadata(&self, key: &str) -> Result<Option<String>>;

    fn set_export_hash(&self, issue_id: &str, content_hash: &str) -> Result<()>;
    fn clear_dirty(&self, issue_id: &str) -> Result<()>;

    // -- Import path ---------------------------------------------------------

    /// Inserts or refreshes an issue from a mirror record, preserving the
    /// record's timestamps. Updates apply only when the record is strictly
    /// newer or its content hash differs. Labels and decision follow the
    /// record wholesale; the imported state is recorded as already exported.
    fn upsert_issue(&self, issue: &Issue, actor: &str) -> Result<UpsertAction>;

    /// Every issue id in the store, sorted.
    fn list_issue_ids(&self) -> Result<Vec<String>>;

    /// Replaces an issue's outgoing edge set (removals first, then inserts
    /// with cycle checking).
    fn replace_dependencies(&self, issue_id: &str, deps: &[Dependency], actor: &str)
    -> Result<()>;
}

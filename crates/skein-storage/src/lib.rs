//! Storage backend for the skein issue engine.
//!
//! Exposes the [`Storage`] and [`Transaction`] traits plus the SQLite
//! implementation ([`SqliteStore`]).

pub mod error;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StorageError};
pub use sqlite::SqliteStore;
pub use traits::{
    BlockedIssue, CreateBatchOptions, DeleteOptions, DeleteOutcome, EpicProgress, IssuePatch,
    NewIdRequest, OrphanMode, Statistics, Storage, Transaction, TreeNode, UpsertAction,
};

use std::collections::HashMap;

use skein_core::comment::{Comment, Event};
use skein_core::dependency::Dependency;
use skein_core::filter::{IssueFilter, StaleFilter, WorkFilter};
use skein_core::issue::Issue;

impl Storage for SqliteStore {
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()> {
        self.create_issue_impl(issue, actor)
    }

    fn create_issues(
        &self,
        issues: &[Issue],
        actor: &str,
        opts: &CreateBatchOptions,
    ) -> Result<()> {
        self.create_issues_impl(issues, actor, opts)
    }

    fn get_issue(&self, id: &str) -> Result<Issue> {
        self.get_issue_impl(id)
    }

    fn get_issue_full(&self, id: &str) -> Result<Issue> {
        self.get_issue_full_impl(id)
    }

    fn get_all_issues_full(&self) -> Result<Vec<Issue>> {
        self.get_all_issues_full_impl()
    }

    fn get_issues_by_ids(&self, ids: &[String]) -> Result<Vec<Issue>> {
        self.get_issues_by_ids_impl(ids)
    }

    fn get_issue_by_external_ref(&self, external_ref: &str) -> Result<Issue> {
        self.get_issue_by_external_ref_impl(external_ref)
    }

    fn update_issue(&self, id: &str, patch: &IssuePatch, actor: &str) -> Result<()> {
        self.update_issue_impl(id, patch, actor)
    }

    fn claim_issue(&self, id: &str, actor: &str) -> Result<()> {
        self.claim_issue_impl(id, actor)
    }

    fn close_issue(&self, id: &str, reason: &str, actor: &str, session: &str) -> Result<()> {
        self.close_issue_impl(id, reason, actor, session)
    }

    fn reopen_issue(&self, id: &str, actor: &str) -> Result<()> {
        self.reopen_issue_impl(id, actor)
    }

    fn delete_issues(
        &self,
        ids: &[String],
        opts: &DeleteOptions,
        actor: &str,
    ) -> Result<DeleteOutcome> {
        self.delete_issues_impl(ids, opts, actor)
    }

    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        self.search_issues_impl(query, filter)
    }

    fn allocate_id(&self, req: &NewIdRequest) -> Result<String> {
        self.allocate_id_impl(req)
    }

    fn update_issue_id(&self, old_id: &str, new_id: &str, actor: &str) -> Result<()> {
        self.update_issue_id_impl(old_id, new_id, actor)
    }

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()> {
        self.add_dependency_impl(dep, actor)
    }

    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()> {
        self.remove_dependency_impl(issue_id, depends_on_id, actor)
    }

    fn get_dependencies(&self, issue_id: &str) -> Result<Vec<Issue>> {
        self.get_dependencies_impl(issue_id)
    }

    fn get_dependents(&self, issue_id: &str) -> Result<Vec<Issue>> {
        self.get_dependents_impl(issue_id)
    }

    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        self.get_dependency_records_impl(issue_id)
    }

    fn get_all_dependency_records(&self) -> Result<HashMap<String, Vec<Dependency>>> {
        self.get_all_dependency_records_impl()
    }

    fn get_dependency_tree(
        &self,
        issue_id: &str,
        max_depth: i32,
        reverse: bool,
    ) -> Result<Vec<TreeNode>> {
        self.get_dependency_tree_impl(issue_id, max_depth, reverse)
    }

    fn detect_cycles(&self) -> Result<Vec<Vec<String>>> {
        self.detect_cycles_impl()
    }

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        self.add_label_impl(issue_id, label, actor)
    }

    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        self.remove_label_impl(issue_id, label, actor)
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        self.get_labels_impl(issue_id)
    }

    fn get_issues_by_label(&self, label: &str) -> Result<Vec<Issue>> {
        self.get_issues_by_label_impl(label)
    }

    fn get_ready_work(&self, filter: &WorkFilter) -> Result<Vec<Issue>> {
        self.get_ready_work_impl(filter)
    }

    fn get_blocked(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>> {
        self.get_blocked_impl(filter)
    }

    fn get_epic_progress(&self, epic_id: &str) -> Result<EpicProgress> {
        self.get_epic_progress_impl(epic_id)
    }

    fn epics_eligible_for_closure(&self) -> Result<Vec<EpicProgress>> {
        self.epics_eligible_for_closure_impl()
    }

    fn get_stale_issues(&self, filter: &StaleFilter) -> Result<Vec<Issue>> {
        self.get_stale_issues_impl(filter)
    }

    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        self.add_comment_impl(issue_id, author, text)
    }

    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        self.get_comments_impl(issue_id)
    }

    fn get_events(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>> {
        self.get_events_impl(issue_id, limit)
    }

    fn get_all_events_since(&self, since_id: i64) -> Result<Vec<Event>> {
        self.get_all_events_since_impl(since_id)
    }

    fn get_statistics(&self) -> Result<Statistics> {
        self.get_statistics_impl()
    }

    fn get_dirty_issues(&self) -> Result<Vec<String>> {
        self.get_dirty_issues_impl()
    }

    fn clear_dirty_issues_by_id(&self, ids: &[String]) -> Result<()> {
        self.clear_dirty_issues_by_id_impl(ids)
    }

    fn mark_all_dirty(&self) -> Result<()> {
        self.mark_all_dirty_impl()
    }

    fn get_export_hash(&self, issue_id: &str) -> Result<Option<String>> {
        self.get_export_hash_impl(issue_id)
    }

    fn set_export_hash(&self, issue_id: &str, content_hash: &str) -> Result<()> {
        self.set_export_hash_impl(issue_id, content_hash)
    }

    fn clear_export_hashes(&self) -> Result<()> {
        self.clear_export_hashes_impl()
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.set_config_impl(key, value)
    }

    fn get_config(&self, key: &str) -> Result<Option<String>> {
        self.get_config_impl(key)
    }

    fn get_all_config(&self) -> Result<HashMap<String, String>> {
        self.get_all_config_impl()
    }

    fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.set_metadata_impl(key, value)
    }

    fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        self.get_metadata_impl(key)
    }

    fn run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()> {
        self.run_in_transaction_impl(f)
    }

    fn close(&self) -> Result<()> {
        self.close_impl()
    }
}

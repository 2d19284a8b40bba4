//! Transaction wrapper for [`SqliteStore`].

use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};

use skein_core::comment::Comment;
use skein_core::dependency::Dependency;
use skein_core::filter::IssueFilter;
use skein_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::store::SqliteStore;
use crate::sqlite::{comments, dependencies, dirty, ids, issues, kv, labels};
use crate::traits::{IssuePatch, Transaction};

/// A connection that already has an open transaction. Delegates to the same
/// connection-level helpers the store methods use, so behaviour inside and
/// outside transactions cannot diverge.
pub(crate) struct SqliteTx<'a> {
    pub(crate) conn: &'a Connection,
}

impl Transaction for SqliteTx<'_> {
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()> {
        issues::insert_issue(self.conn, issue, actor)
    }

    fn update_issue(&self, id: &str, patch: &IssuePatch, actor: &str) -> Result<()> {
        issues::update_issue_on_conn(self.conn, id, patch, actor)
    }

    fn close_issue(&self, id: &str, reason: &str, actor: &str, session: &str) -> Result<()> {
        issues::close_issue_on_conn(self.conn, id, reason, actor, session)
    }

    fn delete_issue(&self, id: &str) -> Result<()> {
        issues::delete_issue_on_conn(self.conn, id)
    }

    fn get_issue(&self, id: &str) -> Result<Issue> {
        issues::get_issue_on_conn(self.conn, id)
    }

    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        issues::search_issues_on_conn(self.conn, query, filter)
    }

    fn update_issue_id(&self, old_id: &str, new_id: &str, actor: &str) -> Result<()> {
        ids::update_issue_id_on_conn(self.conn, old_id, new_id, actor)
    }

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()> {
        dependencies::add_dependency_on_conn(self.conn, dep, actor)
    }

    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()> {
        dependencies::remove_dependency_on_conn(self.conn, issue_id, depends_on_id, actor)
    }

    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        dependencies::get_dependency_records_on_conn(self.conn, issue_id)
    }

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        labels::add_label_on_conn(self.conn, issue_id, label, actor)
    }

    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        labels::remove_label_on_conn(self.conn, issue_id, label, actor)
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        labels::get_labels_on_conn(self.conn, issue_id)
    }

    fn import_comment(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment> {
        comments::import_comment_on_conn(self.conn, issue_id, author, text, created_at)
    }

    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        comments::get_comments_on_conn(self.conn, issue_id)
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        kv::set_kv(self.conn, "config", key, value)
    }

    fn get_config(&self, key: &str) -> Result<Option<String>> {
        kv::get_kv(self.conn, "config", key)
    }

    fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        kv::set_kv(self.conn, "metadata", key, value)
    }

    fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        kv::get_kv(self.conn, "metadata", key)
    }

    fn set_export_hash(&self, issue_id: &str, content_hash: &str) -> Result<()> {
        dirty::set_export_hash_on_conn(self.conn, issue_id, content_hash)
    }

    fn clear_dirty(&self, issue_id: &str) -> Result<()> {
        dirty::clear_dirty_on_conn(self.conn, issue_id)
    }

    fn upsert_issue(&self, issue: &Issue, actor: &str) -> Result<crate::traits::UpsertAction> {
        issues::upsert_issue_on_conn(self.conn, issue, actor)
    }

    fn list_issue_ids(&self) -> Result<Vec<String>> {
        issues::list_issue_ids_on_conn(self.conn)
    }

    fn replace_dependencies(
        &self,
        issue_id: &str,
        deps: &[Dependency],
        actor: &str,
    ) -> Result<()> {
        dependencies::replace_dependencies_on_conn(self.conn, issue_id, deps, actor)
    }
}

impl SqliteStore {
    /// Runs `f` inside a `BEGIN IMMEDIATE` transaction: the write lock is
    /// taken eagerly, so concurrent writers queue at begin rather than
    /// deadlocking mid-transaction.
    pub fn run_in_transaction_impl(
        &self,
        f: &dyn Fn(&dyn Transaction) -> Result<()>,
    ) -> Result<()> {
        self.check_cancelled()?;
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;

        let sqlite_tx = SqliteTx { conn: &tx };
        match f(&sqlite_tx) {
            Ok(()) => tx
                .commit()
                .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}"))),
            // Rolled back when `tx` drops.
            Err(e) => Err(e),
        }
    }
}

//! Opening a project: store-dir discovery, config, fence, store.

use std::path::Path;

use tracing::info;

use skein_config::{Config, IdMode, StoreDir, find_store_dir, load_config, save_config};
use skein_core::cancel::CancelToken;
use skein_core::filter::{IssueFilter, WorkFilter};
use skein_core::issue::Issue;
use skein_lockfile::{FileLock, LockError, LockMode};
use skein_query::CompileContext;
use skein_storage::{
    BlockedIssue, NewIdRequest, Result, SqliteStore, Storage, StorageError,
};
use skein_sync::{SyncOptions, SyncOutcome, run_sync};

/// Engine version stamped into stores and daemon locks.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// An open project: config, fence and store, bundled for one invocation.
///
/// Mutating commands open with [`LockMode::Exclusive`], read-only queries
/// with [`LockMode::Shared`]. The fence releases when the engine drops.
#[derive(Debug)]
pub struct Engine {
    store_dir: StoreDir,
    config: Config,
    store: SqliteStore,
    cancel: CancelToken,
    _fence: FileLock,
}

impl Engine {
    /// Creates a fresh `.skein/` directory under `project_root` and opens
    /// it.
    pub fn init(project_root: &Path, config: Config) -> Result<Self> {
        let store_dir = StoreDir::new(project_root.join(skein_config::STORE_DIR_NAME));
        std::fs::create_dir_all(&store_dir.root).map_err(|e| {
            StorageError::Connection(format!(
                "failed to create {}: {e}",
                store_dir.root.display()
            ))
        })?;
        save_config(&store_dir.root, &config)
            .map_err(|e| StorageError::invalid(e.to_string()))?;
        info!(dir = %store_dir.root.display(), "initialized project");
        Self::open_store_dir(store_dir, LockMode::Exclusive)
    }

    /// Walks up from `start` to find the project and opens it.
    pub fn open(start: &Path, mode: LockMode) -> Result<Self> {
        let store_dir = find_store_dir(start).ok_or_else(|| {
            StorageError::not_found("project", format!("{} (no .skein found)", start.display()))
        })?;
        Self::open_store_dir(store_dir, mode)
    }

    fn open_store_dir(store_dir: StoreDir, mode: LockMode) -> Result<Self> {
        let config =
            load_config(&store_dir.root).map_err(|e| StorageError::invalid(e.to_string()))?;

        let database = store_dir.database_path();
        let fence = FileLock::acquire(&database, mode).map_err(|e| match e {
            LockError::Busy => StorageError::lock_busy(
                "another skein command holds the database; retry in a moment",
            ),
            LockError::Io(e) => StorageError::Connection(format!("lock file error: {e}")),
        })?;

        let cancel = CancelToken::new();
        let store = SqliteStore::open_with_token(&database, cancel.clone())?;

        let engine = Self {
            store_dir,
            config,
            store,
            cancel,
            _fence: fence,
        };
        // Writing the config seeds is a mutation; shared-mode (read-only)
        // opens must not touch the store.
        if mode == LockMode::Exclusive {
            engine.seed_store_config()?;
        }
        Ok(engine)
    }

    /// Mirrors file-config the storage layer validates against into the
    /// store's config table.
    fn seed_store_config(&self) -> Result<()> {
        self.store.set_config("issue_prefix", &self.config.prefix)?;
        self.store
            .set_config("statuses.custom", &self.config.extensions.statuses)?;
        self.store
            .set_config("types.custom", &self.config.extensions.types)?;
        self.store.set_metadata(
            skein_storage::sqlite::schema::meta_keys::LAST_ENGINE_VERSION,
            ENGINE_VERSION,
        )?;
        Ok(())
    }

    // -- Accessors -----------------------------------------------------------

    pub fn store(&self) -> &dyn Storage {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store_dir(&self) -> &StoreDir {
        &self.store_dir
    }

    /// Token the embedding command flips on SIGINT.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    // -- High-level operations -----------------------------------------------

    /// Creates an issue, minting an id when the draft has none. An optional
    /// parent makes it a child (`{parent}.{n}`) with a `parent-child` edge.
    pub fn create_issue(
        &self,
        mut issue: Issue,
        parent: Option<&str>,
        actor: &str,
    ) -> Result<Issue> {
        if issue.id.is_empty() {
            issue.id = self.store.allocate_id(&NewIdRequest {
                prefix: self.config.prefix.clone(),
                hash_mode: self.config.ids.mode == IdMode::Hash,
                hash_length: self.config.ids.hash_length,
                salt: self.config.ids.salt.clone(),
                title: issue.title.clone(),
                created_at: issue.created_at,
                parent: parent.map(str::to_string),
            })?;
        }
        self.store.create_issue(&issue, actor)?;
        if let Some(parent) = parent {
            self.store.add_dependency(
                &skein_core::dependency::Dependency::new(
                    issue.id.clone(),
                    parent,
                    skein_core::enums::DependencyType::ParentChild,
                    actor,
                ),
                actor,
            )?;
        }
        self.store.get_issue(&issue.id)
    }

    /// Runs a query-language search: compile, push the filter down, apply
    /// the residual predicate against hydrated rows.
    pub fn search(&self, query: &str) -> Result<Vec<Issue>> {
        let ctx = CompileContext {
            now: chrono::Utc::now(),
            custom_statuses: self.config.custom_statuses(),
            custom_types: self.config.custom_types(),
        };
        let compiled = skein_query::compile(query, &ctx)
            .map_err(|e| StorageError::invalid(e.to_string()))?;

        let rows = self.store.search_issues("", &compiled.filter)?;
        if compiled.is_filter_only() {
            return Ok(rows);
        }

        let mut matched = Vec::new();
        for row in rows {
            if self.cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }
            // Predicates may look at labels and metadata: hydrate first.
            let full = self.store.get_issue_full(&row.id)?;
            if compiled.admits(&full) {
                matched.push(full);
            }
        }
        Ok(matched)
    }

    /// Plain text search with a structured filter.
    pub fn search_text(&self, text: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        self.store.search_issues(text, filter)
    }

    /// Links an issue to its twin in a third-party tracker: the URL is
    /// canonicalised before it lands in `external_ref`.
    pub fn link_external(
        &self,
        issue_id: &str,
        url: &str,
        actor: &str,
    ) -> Result<skein_remote::CanonicalRef> {
        let canonical =
            skein_remote::canonicalize_ref(url).map_err(|e| StorageError::invalid(e.to_string()))?;
        let patch = skein_storage::IssuePatch {
            external_ref: Some(Some(canonical.url.clone())),
            ..Default::default()
        };
        self.store.update_issue(issue_id, &patch, actor)?;
        Ok(canonical)
    }

    pub fn ready(&self, filter: &WorkFilter) -> Result<Vec<Issue>> {
        self.store.get_ready_work(filter)
    }

    pub fn blocked(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>> {
        self.store.get_blocked(filter)
    }

    /// Import + export against the project mirror.
    pub fn sync(&self, opts: &SyncOptions) -> Result<SyncOutcome> {
        run_sync(
            &self.store,
            &self.store_dir,
            &self.config,
            opts,
            &self.cancel,
        )
    }

    /// Bounded teardown of the backend.
    pub fn close(self) -> Result<()> {
        self.store.close()
    }
}

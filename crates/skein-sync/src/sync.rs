//! The sync operation: import the mirror, export local changes, optionally
//! hand the mirror to the host VCS.
//!
//! Sync runs under the caller's exclusive fence and holds the writer for
//! its whole duration; no concurrent import or export on the same project
//! is legal.

use chrono::Utc;
use tracing::info;

use skein_config::{Config, StoreDir};
use skein_core::cancel::CancelToken;
use skein_storage::sqlite::schema::meta_keys;
use skein_storage::{Result, Storage};

use crate::export::{ExportOptions, ExportOutcome, export_incremental};
use crate::import::{ImportOptions, ImportOutcome, import_mirror};

/// Sync tuning.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Full sync: mark everything dirty and allow mirror compaction.
    pub full: bool,
    /// Delete store issues absent from the mirror during the import leg.
    pub delete_missing: bool,
}

/// What a sync did.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub import: ImportOutcome,
    pub export: ExportOutcome,
    /// Whether the mirror was committed to the host VCS.
    pub committed: bool,
}

/// Runs a full import-then-export cycle against the project's mirror.
pub fn run_sync(
    store: &dyn Storage,
    store_dir: &StoreDir,
    config: &Config,
    opts: &SyncOptions,
    cancel: &CancelToken,
) -> Result<SyncOutcome> {
    let mirror_path = store_dir.mirror_path();
    let project_root = store_dir.project_root().to_path_buf();

    // Mirror path relative to the VCS root, for resurrect and commits.
    let git_root = skein_git::find_git_root(&project_root);
    let mirror_rel = git_root.as_ref().and_then(|root| {
        mirror_path
            .strip_prefix(root)
            .ok()
            .map(|p| p.to_string_lossy().into_owned())
    });

    let import_opts = ImportOptions {
        orphan_policy: config.sync.orphan_policy,
        delete_missing: opts.delete_missing,
        resurrect_source: git_root.clone().zip(mirror_rel.clone()),
        actor: "sync".to_string(),
    };
    let import = import_mirror(store, &mirror_path, &import_opts, cancel)?;

    if opts.full {
        store.mark_all_dirty()?;
    }

    let export_opts = ExportOptions {
        compact: opts.full,
        tombstone_ratio: config.sync.compact_tombstone_ratio,
    };
    let export = export_incremental(store, &mirror_path, &export_opts, cancel)?;

    store.set_metadata(meta_keys::LAST_SYNC, &Utc::now().to_rfc3339())?;

    let mut committed = false;
    if config.sync.commit_mirror {
        if let (Some(root), Some(rel)) = (git_root, mirror_rel) {
            skein_git::commit_file(&root, &rel, "skein: sync issue mirror").map_err(|e| {
                skein_storage::StorageError::Connection(format!(
                    "failed to commit mirror: {e}"
                ))
            })?;
            committed = true;
        }
    }

    info!(
        imported = import.created.len() + import.updated.len(),
        exported = export.written,
        committed,
        "sync complete"
    );
    Ok(SyncOutcome {
        import,
        export,
        committed,
    })
}

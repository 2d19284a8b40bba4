//! Incremental export: store -> mirror.
//!
//! The mirror is rewritten line-stably: updated records overwrite their
//! existing line, deletions leave a blank tombstone in place, new records
//! append at the end. Only once the file is durably swapped in are export
//! hashes recorded and dirty flags cleared, so a failed export leaves both
//! the mirror bytes and the dirty set untouched.

use std::collections::HashMap;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use skein_core::cancel::CancelToken;
use skein_core::content_hash::compute_content_hash;
use skein_core::mirror;
use skein_storage::sqlite::schema::meta_keys;
use skein_storage::{Result, Storage, StorageError};

/// Export tuning.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Allow dropping tombstones when their share passes the threshold.
    /// Full syncs set this; plain incremental exports leave lines stable.
    pub compact: bool,
    /// Tombstone share (0.0..=1.0) that triggers compaction.
    pub tombstone_ratio: f64,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            compact: false,
            tombstone_ratio: 0.5,
        }
    }
}

/// What an export did.
#[derive(Debug, Clone, Default)]
pub struct ExportOutcome {
    /// Lines written or rewritten.
    pub written: usize,
    /// Dirty records skipped because only `updated_at` moved.
    pub skipped: usize,
    /// Deletions tombstoned this run.
    pub tombstoned: usize,
    /// Whether the compaction pass rewrote the file.
    pub compacted: bool,
    /// Hex sha-256 of the mirror as it now stands.
    pub mirror_hash: String,
}

/// Streams the dirty set into the mirror file.
pub fn export_incremental(
    store: &dyn Storage,
    mirror_path: &Path,
    opts: &ExportOptions,
    cancel: &CancelToken,
) -> Result<ExportOutcome> {
    let original = read_mirror_text(mirror_path)?;
    let mut lines: Vec<String> = if original.is_empty() {
        Vec::new()
    } else {
        original.lines().map(str::to_string).collect()
    };
    let index = build_line_index(&lines)?;

    let dirty = store.get_dirty_issues()?;
    debug!(dirty = dirty.len(), "starting incremental export");

    let mut outcome = ExportOutcome::default();
    let mut processed: Vec<String> = Vec::new();
    let mut new_hashes: Vec<(String, String)> = Vec::new();

    for id in &dirty {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let issue = match store.get_issue_full(id) {
            Ok(issue) => issue,
            Err(StorageError::NotFound { .. }) => {
                // Deleted since it was marked dirty: tombstone its line.
                if let Some(&line_no) = index.get(id) {
                    lines[line_no].clear();
                    outcome.tombstoned += 1;
                }
                processed.push(id.clone());
                continue;
            }
            Err(e) => return Err(e),
        };

        let content_hash = compute_content_hash(&issue);
        if index.contains_key(id)
            && store.get_export_hash(id)?.as_deref() == Some(content_hash.as_str())
        {
            // Timestamp-only dirty: the line already carries this content.
            // The index check guards against a truncated or fresh mirror
            // whose hash bookkeeping outlived its lines.
            outcome.skipped += 1;
            processed.push(id.clone());
            continue;
        }

        let line = mirror::write_line(&issue);
        match index.get(id) {
            Some(&line_no) => lines[line_no] = line,
            None => lines.push(line),
        }
        new_hashes.push((id.clone(), content_hash));
        outcome.written += 1;
        processed.push(id.clone());
    }

    // Compaction drops tombstones once they dominate the file.
    let tombstones = lines.iter().filter(|l| l.is_empty()).count();
    if opts.compact
        && !lines.is_empty()
        && (tombstones as f64 / lines.len() as f64) > opts.tombstone_ratio
    {
        lines.retain(|l| !l.is_empty());
        outcome.compacted = true;
        info!(dropped = tombstones, "compacted mirror tombstones");
    }

    let mut rendered = lines.join("\n");
    if !rendered.is_empty() {
        rendered.push('\n');
    }

    // Only touch the file when its bytes would actually change; idempotent
    // exports leave it alone entirely.
    if rendered != original {
        write_atomically(mirror_path, &rendered)?;
    }

    // Write commit done: record hashes, clear dirty, stamp metadata.
    for (id, hash) in &new_hashes {
        store.set_export_hash(id, hash)?;
    }
    store.clear_dirty_issues_by_id(&processed)?;

    outcome.mirror_hash = hex_sha256(rendered.as_bytes());
    store.set_metadata(meta_keys::MIRROR_HASH, &outcome.mirror_hash)?;
    if outcome.compacted {
        store.set_metadata(
            meta_keys::MIRROR_COMPACTED_AT,
            &chrono::Utc::now().to_rfc3339(),
        )?;
    }

    info!(
        written = outcome.written,
        skipped = outcome.skipped,
        tombstoned = outcome.tombstoned,
        "export complete"
    );
    Ok(outcome)
}

/// Reads the mirror file; a missing file is an empty mirror.
pub(crate) fn read_mirror_text(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(StorageError::Connection(format!(
            "failed to read mirror {}: {e}",
            path.display()
        ))),
    }
}

/// Maps record id -> line number (0-based), skipping tombstones.
fn build_line_index(lines: &[String]) -> Result<HashMap<String, usize>> {
    let mut index = HashMap::new();
    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = mirror::parse_line(line, i + 1)
            .map_err(|e| StorageError::invalid(e.to_string()))?;
        index.insert(record.id, i);
    }
    Ok(index)
}

/// Writes via a temp file + rename so a failure mid-write cannot corrupt
/// the mirror.
fn write_atomically(path: &Path, content: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .map_err(|e| StorageError::Connection(format!("failed to create {}: {e}", dir.display())))?;
    let tmp = path.with_extension("jsonl.tmp");
    std::fs::write(&tmp, content)
        .map_err(|e| StorageError::Connection(format!("failed to write mirror: {e}")))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| StorageError::Connection(format!("failed to swap mirror in: {e}")))?;
    Ok(())
}

pub(crate) fn hex_sha256(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}

//! Locating the `.skein/` directory for a project.

use std::path::{Path, PathBuf};

/// Name of the per-project engine directory.
pub const STORE_DIR_NAME: &str = ".skein";

/// Resolved paths inside a project's `.skein/` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDir {
    /// The `.skein/` directory itself.
    pub root: PathBuf,
}

impl StoreDir {
    /// Wraps an existing (or to-be-created) `.skein/` path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The project root (parent of `.skein/`).
    pub fn project_root(&self) -> &Path {
        self.root.parent().unwrap_or(&self.root)
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join("issues.db")
    }

    pub fn mirror_path(&self) -> PathBuf {
        self.root.join("issues.jsonl")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    pub fn daemon_lock_path(&self) -> PathBuf {
        self.root.join("daemon.lock")
    }

    pub fn daemon_socket_path(&self) -> PathBuf {
        self.root.join("daemon.sock")
    }
}

/// Walks up from `start` looking for a `.skein/` directory.
///
/// Returns `None` when the filesystem root is reached without a hit.
pub fn find_store_dir(start: &Path) -> Option<StoreDir> {
    let start = start.canonicalize().ok()?;
    let mut current = start.as_path();
    loop {
        let candidate = current.join(STORE_DIR_NAME);
        if candidate.is_dir() {
            return Some(StoreDir::new(candidate));
        }
        match current.parent() {
            Some(parent) if parent != current => current = parent,
            _ => return None,
        }
    }
}

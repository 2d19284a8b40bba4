//! The per-database file fence.
//!
//! Read-only commands take the lock shared, mutating commands exclusive.
//! Acquisition never blocks: a busy lock surfaces [`LockError::Busy`] so the
//! caller can print something useful instead of spinning.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

/// Errors from fence acquisition.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process holds a conflicting lock.
    #[error("database is locked by another process (try again shortly)")]
    Busy,

    /// The lock file could not be created or locked.
    #[error("lock file error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LockError>;

/// Requested lock strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Concurrent readers allowed.
    Shared,
    /// Single writer.
    Exclusive,
}

/// A held advisory lock on `<database>.lock`.
///
/// The lock releases when the value drops. On filesystems without advisory
/// locking support, acquisition degrades to a no-op holder so single-process
/// embedded builds keep working.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    mode: LockMode,
    /// `None` in degraded (no-op) mode.
    file: Option<File>,
}

impl FileLock {
    /// Acquires the fence for the given database path, non-blocking.
    pub fn acquire(database: &Path, mode: LockMode) -> Result<Self> {
        let path = lock_path(database);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        // Fully-qualified: std 1.89 grew inherent `File::try_lock_*` methods
        // that would otherwise shadow the fs2 trait.
        let outcome = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
        };

        match outcome {
            Ok(()) => Ok(Self {
                path,
                mode,
                file: Some(file),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(LockError::Busy),
            // ENOTSUP and friends: the filesystem cannot do advisory locks.
            Err(e) if e.kind() == std::io::ErrorKind::Unsupported => Ok(Self {
                path,
                mode,
                file: None,
            }),
            Err(e) => Err(LockError::Io(e)),
        }
    }

    /// A lock holder that guards nothing, for embedded builds without a
    /// shared filesystem.
    pub fn noop(database: &Path, mode: LockMode) -> Self {
        Self {
            path: lock_path(database),
            mode,
            file: None,
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Whether a real OS lock is held (false in degraded mode).
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}

/// The fence lives next to the database as `<database>.lock`.
fn lock_path(database: &Path) -> PathBuf {
    let mut name = database
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    database.with_file_name(name)
}

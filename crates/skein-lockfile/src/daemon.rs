//! The daemon lock file.
//!
//! A daemon that owns a store writes a JSON record to `.skein/daemon.lock`
//! and holds an exclusive lock on it for its lifetime. Clients detect the
//! daemon by probing that lock: if the probe acquires it, nobody is home and
//! the file is stale; if the probe would block, the daemon is alive. A pid
//! existence check backs the probe up against lock-leaking filesystems.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::fence::{LockError, Result};

/// Contents of the daemon lock file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonLockInfo {
    pub pid: u32,
    pub parent_pid: u32,
    /// Absolute path of the database the daemon owns.
    pub database: String,
    /// Engine version of the daemon, for mismatch warnings.
    pub version: String,
    pub started_at: DateTime<Utc>,
}

impl DaemonLockInfo {
    /// Builds a record for the current process.
    pub fn for_current_process(database: &Path, version: &str) -> Self {
        Self {
            pid: std::process::id(),
            parent_pid: parent_pid(),
            database: database.display().to_string(),
            version: version.to_string(),
            started_at: Utc::now(),
        }
    }
}

/// A held daemon lock. Dropping it releases the OS lock; the file itself is
/// left behind for the next client to recover.
#[derive(Debug)]
pub struct DaemonLock {
    file: File,
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Writes the daemon record and takes the exclusive lock, failing with
/// [`LockError::Busy`] when another daemon already owns the store.
pub fn write_daemon_lock(path: &Path, info: &DaemonLockInfo) -> Result<DaemonLock> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;

    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Err(LockError::Busy),
        Err(e) => return Err(LockError::Io(e)),
    }

    // Locked: now safe to rewrite the record.
    file.set_len(0)?;
    let json = serde_json::to_string_pretty(info).expect("lock record serialises");
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_all()?;

    Ok(DaemonLock { file })
}

/// Outcome of probing for a daemon.
#[derive(Debug)]
pub enum DaemonProbe {
    /// No lock file: no daemon has ever run (or it was cleaned up).
    Absent,
    /// A daemon holds the lock and its pid exists.
    Alive(DaemonLockInfo),
    /// Lock file present but unheld or pid gone; the stale file was removed.
    StaleRecovered,
}

/// Probes the daemon lock file, recovering stale leftovers.
pub fn probe_daemon(path: &Path) -> Result<DaemonProbe> {
    if !path.exists() {
        return Ok(DaemonProbe::Absent);
    }

    let file = OpenOptions::new().read(true).write(true).open(path)?;

    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {
            // Nobody holds it: stale. Release and remove.
            let _ = FileExt::unlock(&file);
            drop(file);
            let _ = std::fs::remove_file(path);
            Ok(DaemonProbe::StaleRecovered)
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
            let content = std::fs::read_to_string(path)?;
            match serde_json::from_str::<DaemonLockInfo>(&content) {
                Ok(info) if pid_alive(info.pid) => Ok(DaemonProbe::Alive(info)),
                // Held lock but bogus record or dead pid: treat as stale but
                // leave the file alone while something still holds the lock.
                _ => Ok(DaemonProbe::StaleRecovered),
            }
        }
        Err(e) => Err(LockError::Io(e)),
    }
}

/// Whether a process with this pid currently exists.
#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_alive(_pid: u32) -> bool {
    // No portable probe without unsafe; the lock-held check already
    // established a live holder.
    true
}

#[cfg(target_os = "linux")]
fn parent_pid() -> u32 {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|s| {
            s.lines()
                .find(|l| l.starts_with("PPid:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|p| p.parse().ok())
        })
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn parent_pid() -> u32 {
    0
}

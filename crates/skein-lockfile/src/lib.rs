//! Cross-process locking.
//!
//! Two locks protect a store: the per-database fence taken by every command
//! invocation ([`fence`]) and the daemon lock file advertising a long-lived
//! owner ([`daemon`]).

pub mod daemon;
pub mod fence;

pub use daemon::{DaemonLock, DaemonLockInfo, DaemonProbe, probe_daemon, write_daemon_lock};
pub use fence::{FileLock, LockError, LockMode};

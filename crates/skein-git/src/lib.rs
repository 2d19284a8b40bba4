//! Host-VCS helpers.
//!
//! The engine touches git for three things only: discovering the repository
//! root, reading the previously committed mirror (orphan resurrection), and
//! optionally committing the mirror after a sync. Everything shells out to
//! the `git` binary; no repository state is cached.

use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Errors from git invocations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The git binary could not be found or spawned.
    #[error("failed to execute git: {0}")]
    Spawn(#[from] std::io::Error),

    /// The git command exited non-zero.
    #[error("git command failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        code: Option<i32>,
        stderr: String,
    },

    /// Not inside a git repository.
    #[error("not a git repository")]
    NotARepo,
}

pub type Result<T> = std::result::Result<T, GitError>;

/// Runs a `git` command in `cwd`, returning trimmed stdout.
pub fn git_command(args: &[&str], cwd: &Path) -> Result<String> {
    let output = Command::new("git").args(args).current_dir(cwd).output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(GitError::CommandFailed {
            code: output.status.code(),
            stderr,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Walks up from `start` looking for `.git` (directory, or file in
/// worktrees). Purely filesystem-based; never shells out.
pub fn find_git_root(start: &Path) -> Option<PathBuf> {
    let start = start.canonicalize().ok()?;
    let mut current = start.as_path();
    loop {
        if current.join(".git").exists() {
            return Some(current.to_path_buf());
        }
        match current.parent() {
            Some(parent) if parent != current => current = parent,
            _ => return None,
        }
    }
}

/// Whether `path` is inside a git repository.
pub fn is_git_repo(path: &Path) -> bool {
    find_git_root(path).is_some()
}

/// Reads a file's content as of `HEAD`.
///
/// `path` is given relative to the repository root. Used by orphan
/// resurrection to pull a deleted issue's last committed mirror line.
pub fn show_head(repo_root: &Path, path: &str) -> Result<String> {
    git_command(&["show", &format!("HEAD:{path}")], repo_root)
}

/// Stages one file and commits it with the given message.
///
/// Succeeds quietly when there is nothing to commit.
pub fn commit_file(repo_root: &Path, path: &str, message: &str) -> Result<()> {
    git_command(&["add", "--", path], repo_root)?;

    let staged = git_command(&["diff", "--cached", "--name-only", "--", path], repo_root)?;
    if staged.is_empty() {
        return Ok(());
    }

    git_command(&["commit", "-m", message, "--", path], repo_root)?;
    Ok(())
}

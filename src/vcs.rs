//! VCS Gate — git operations over a project root, shelled out to the
//! system `git` binary rather than a git2 binding, matching the pack's
//! process-based precedent for git interaction.

use std::path::{Path, PathBuf};
use std::process::Output;

use thiserror::Error;
use tracing::{error, warn};

/// Paths excluded from manual-change detection and from commits produced
/// by `commit_manual_changes`.
const EXCLUDED_PATHS: &[&str] = &["agents.md", "progress.txt"];
const EXCLUDED_PREFIX: &str = ".ralph/";

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("failed to spawn git: {0}")]
    Spawn(#[from] std::io::Error),
}

pub struct VcsGate {
    root: PathBuf,
}

impl VcsGate {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn run(&self, args: &[&str]) -> Result<Output, VcsError> {
        std::process::Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .map_err(VcsError::from)
    }

    fn run_ok(&self, args: &[&str]) -> Result<(), VcsError> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(VcsError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }
        Ok(())
    }

    /// Create a repo; if any files already exist, stage all and commit.
    pub fn init(&self) -> Result<(), VcsError> {
        self.run_ok(&["init"])?;
        let has_entries = std::fs::read_dir(&self.root)
            .map(|mut it| it.next().is_some())
            .unwrap_or(false);
        if has_entries {
            self.run_ok(&["add", "-A"])?;
            // An empty-tree commit is not an error here; git returns non-zero
            // if there is nothing staged, which we treat as already clean.
            let _ = self.run_ok(&["commit", "-m", "initial-commit: Project initialized"]);
        }
        Ok(())
    }

    /// List of changed paths (staged, unstaged, and untracked).
    pub fn status(&self) -> Result<Vec<String>, VcsError> {
        let output = self.run(&["status", "--porcelain"])?;
        if !output.status.success() {
            return Err(VcsError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text
            .lines()
            .filter_map(|line| line.get(3..).map(|p| p.trim().to_string()))
            .filter(|p| !p.is_empty())
            .collect())
    }

    fn is_excluded(path: &str) -> bool {
        EXCLUDED_PATHS.contains(&path) || path.starts_with(EXCLUDED_PREFIX)
    }

    /// True iff any changed path is not in the excluded set.
    pub fn has_uncommitted_changes(&self) -> Result<bool, VcsError> {
        Ok(self.status()?.iter().any(|p| !Self::is_excluded(p)))
    }

    /// Stage and commit non-excluded changed paths, returning the list
    /// committed.
    pub fn commit_manual_changes(&self) -> Result<Vec<String>, VcsError> {
        let changed = self.status()?;
        let to_commit: Vec<String> = changed.into_iter().filter(|p| !Self::is_excluded(p)).collect();
        if to_commit.is_empty() {
            return Ok(to_commit);
        }
        for path in &to_commit {
            self.run_ok(&["add", "--", path])?;
        }
        let message = format!("[USER_MANUAL_CHANGE] Detected changes in: {}", to_commit.join(", "));
        self.run_ok(&["commit", "-m", &message])?;
        Ok(to_commit)
    }

    pub fn add_and_commit(&self, message: &str) -> Result<(), VcsError> {
        self.run_ok(&["add", "-A"])?;
        self.run_ok(&["commit", "-m", message])
    }

    /// Hard reset to HEAD and clean untracked dirs/files. Failure here is
    /// swallowed by callers so it never masks the triggering error.
    pub fn rollback_to_last_commit(&self) -> Result<(), VcsError> {
        self.run_ok(&["reset", "--hard", "HEAD"])?;
        self.run_ok(&["clean", "-fd"])
    }
}

/// Run rollback, logging but swallowing any failure — per spec, a rollback
/// failure must never mask the error that triggered it.
pub fn rollback_best_effort(root: &Path) {
    let gate = VcsGate::new(root.to_path_buf());
    if let Err(e) = gate.rollback_to_last_commit() {
        error!("rollback failed (swallowed): {e}");
    } else {
        warn!("rolled back to last commit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excluded_paths_match_spec_set() {
        assert!(VcsGate::is_excluded("agents.md"));
        assert!(VcsGate::is_excluded("progress.txt"));
        assert!(VcsGate::is_excluded(".ralph/logs/foo.md"));
        assert!(!VcsGate::is_excluded("src/a.js"));
    }
}

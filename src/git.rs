//! Git operations behind a testable seam.
//!
//! The orchestrator needs a handful of plumbing calls: resolve the bound
//! branch/commit, list files changed since the bound commit, and create the
//! final commit. [`GitCli`] shells out to `git`; tests substitute
//! [`crate::testing::MockGitOperations`].

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use std::process::Command;

use crate::error::{Result, TandemError};

/// Abstraction for git operations.
pub trait GitOperations: Send + Sync {
    /// Get the current HEAD commit hash.
    fn head_commit(&self, repo: &Path) -> Result<String>;

    /// Get the current branch name.
    fn current_branch(&self, repo: &Path) -> Result<String>;

    /// List files changed (working tree included) since the given commit.
    fn changed_files(&self, repo: &Path, since_commit: &str) -> Result<Vec<String>>;

    /// Stage everything and commit; returns the new commit hash.
    fn commit_all(&self, repo: &Path, message: &str) -> Result<String>;
}

/// Git operations backed by the `git` CLI.
#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl GitCli {
    fn run(&self, repo: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(repo)
            .output()
            .map_err(|e| TandemError::git(args.join(" "), e.to_string()))?;

        if !output.status.success() {
            return Err(TandemError::git(
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl GitOperations for GitCli {
    fn head_commit(&self, repo: &Path) -> Result<String> {
        self.run(repo, &["rev-parse", "HEAD"])
    }

    fn current_branch(&self, repo: &Path) -> Result<String> {
        self.run(repo, &["rev-parse", "--abbrev-ref", "HEAD"])
    }

    fn changed_files(&self, repo: &Path, since_commit: &str) -> Result<Vec<String>> {
        let committed = self.run(repo, &["diff", "--name-only", since_commit])?;
        let untracked = self.run(repo, &["ls-files", "--others", "--exclude-standard"])?;

        let mut files: Vec<String> = committed
            .lines()
            .chain(untracked.lines())
            .filter(|l| !l.is_empty())
            .map(|l| l.to_string())
            .collect();
        files.sort();
        files.dedup();
        Ok(files)
    }

    fn commit_all(&self, repo: &Path, message: &str) -> Result<String> {
        self.run(repo, &["add", "-A"])?;
        self.run(repo, &["commit", "-m", message])?;
        self.head_commit(repo)
    }
}

/// Filter paths through glob patterns; empty patterns pass everything.
pub fn filter_paths(paths: Vec<String>, patterns: &[String]) -> Result<Vec<String>> {
    if patterns.is_empty() {
        return Ok(paths);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| TandemError::InvalidConfig {
                field: "glob pattern".into(),
                reason: e.to_string(),
            })?;
        builder.add(glob);
    }
    let set: GlobSet = builder
        .build()
        .map_err(|e| TandemError::InvalidConfig {
            field: "glob set".into(),
            reason: e.to_string(),
        })?;
    Ok(paths.into_iter().filter(|p| set.is_match(p)).collect())
}

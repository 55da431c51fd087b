//! Local branch operations used when syncing a plan's working branch.
//!
//! [`BranchOperations`] abstracts the version-control tool so sync logic can
//! be tested without a repository; [`GitCli`] runs the real `git` binary.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::process::{Command, Output};
use tracing::debug;

/// Outcome of a rebase attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseOutcome {
    Clean,
    /// Paths left conflicted; the rebase is still in progress
    Conflicts(Vec<String>),
}

/// Abstraction over local branch operations.
///
/// # Example
///
/// ```
/// use planstore::git::BranchOperations;
/// use planstore::testing::MockBranchOperations;
///
/// let git = MockBranchOperations::new().with_current_branch("main");
/// assert_eq!(git.current_branch().unwrap().as_deref(), Some("main"));
/// ```
pub trait BranchOperations {
    /// Current branch, or `None` on a detached HEAD.
    ///
    /// # Errors
    ///
    /// Returns an error if not in a repository.
    fn current_branch(&self) -> Result<Option<String>>;

    /// Fetch `branch` from `remote`.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote is unreachable or lacks the branch.
    fn fetch_branch(&self, remote: &str, branch: &str) -> Result<()>;

    fn local_branch_exists(&self, branch: &str) -> Result<bool>;

    fn checkout(&self, branch: &str) -> Result<()>;

    /// Create and check out `branch` tracking `remote_ref`.
    fn create_tracking_branch(&self, branch: &str, remote_ref: &str) -> Result<()>;

    /// Rebase the current branch onto `upstream`.
    fn rebase_onto(&self, upstream: &str) -> Result<RebaseOutcome>;

    fn abort_rebase(&self) -> Result<()>;
}

/// [`BranchOperations`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_dir: PathBuf,
}

impl GitCli {
    #[must_use]
    pub fn new(repo_dir: PathBuf) -> Self {
        Self { repo_dir }
    }

    fn git(&self, args: &[&str]) -> Result<Output> {
        debug!("git {}", args.join(" "));
        Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .with_context(|| format!("Failed to run git {}", args.first().unwrap_or(&"")))
    }

    fn git_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.git(args)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )
        }
    }
}

impl BranchOperations for GitCli {
    fn current_branch(&self) -> Result<Option<String>> {
        let branch = self.git_checked(&["branch", "--show-current"])?;
        Ok((!branch.is_empty()).then_some(branch))
    }

    fn fetch_branch(&self, remote: &str, branch: &str) -> Result<()> {
        self.git_checked(&["fetch", remote, branch]).map(|_| ())
    }

    fn local_branch_exists(&self, branch: &str) -> Result<bool> {
        let refname = format!("refs/heads/{branch}");
        let output = self.git(&["show-ref", "--verify", "--quiet", &refname])?;
        Ok(output.status.success())
    }

    fn checkout(&self, branch: &str) -> Result<()> {
        self.git_checked(&["checkout", branch]).map(|_| ())
    }

    fn create_tracking_branch(&self, branch: &str, remote_ref: &str) -> Result<()> {
        self.git_checked(&["checkout", "-b", branch, "--track", remote_ref])
            .map(|_| ())
    }

    fn rebase_onto(&self, upstream: &str) -> Result<RebaseOutcome> {
        let output = self.git(&["rebase", upstream])?;
        if output.status.success() {
            return Ok(RebaseOutcome::Clean);
        }
        let conflicted = self.git_checked(&["diff", "--name-only", "--diff-filter=U"])?;
        let paths: Vec<String> = conflicted.lines().map(str::to_string).collect();
        if paths.is_empty() {
            bail!(
                "git rebase {} failed: {}",
                upstream,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(RebaseOutcome::Conflicts(paths))
    }

    fn abort_rebase(&self) -> Result<()> {
        self.git_checked(&["rebase", "--abort"]).map(|_| ())
    }
}

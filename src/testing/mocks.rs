//! Mock implementations of collaborator traits.
//!
//! These mocks provide controllable test doubles for external dependencies,
//! enabling deterministic unit tests.

use anyhow::{bail, Result};
use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::git::{BranchOperations, RebaseOutcome};

/// Mock implementation of branch operations.
///
/// Checkout and tracking-branch creation update the mock's own state, so a
/// sequence of calls behaves like a small repository. Every call is
/// recorded for assertions.
///
/// # Example
///
/// ```
/// use planstore::git::BranchOperations;
/// use planstore::testing::MockBranchOperations;
///
/// let git = MockBranchOperations::new()
///     .with_current_branch("main")
///     .with_local_branch("P12-add-retries");
///
/// git.checkout("P12-add-retries").unwrap();
/// assert_eq!(git.current_branch().unwrap().as_deref(), Some("P12-add-retries"));
/// assert_eq!(git.calls(), vec!["checkout P12-add-retries"]);
/// ```
#[derive(Debug)]
pub struct MockBranchOperations {
    current: Mutex<Option<String>>,
    local_branches: Mutex<BTreeSet<String>>,
    conflicts: Vec<String>,
    fetch_error: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl Default for MockBranchOperations {
    fn default() -> Self {
        Self {
            current: Mutex::new(Some("main".to_string())),
            local_branches: Mutex::new(BTreeSet::from(["main".to_string()])),
            conflicts: Vec::new(),
            fetch_error: None,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockBranchOperations {
    /// Create a new mock on `main` with no other branches.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the checked-out branch, creating it locally.
    #[must_use]
    pub fn with_current_branch(self, branch: &str) -> Self {
        if let Ok(mut current) = self.current.lock() {
            *current = Some(branch.to_string());
        }
        self.with_local_branch(branch)
    }

    /// Add a local branch.
    #[must_use]
    pub fn with_local_branch(self, branch: &str) -> Self {
        if let Ok(mut branches) = self.local_branches.lock() {
            branches.insert(branch.to_string());
        }
        self
    }

    /// Make every rebase stop with these conflicted paths.
    #[must_use]
    pub fn with_rebase_conflicts(mut self, paths: &[&str]) -> Self {
        self.conflicts = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Configure fetch to fail with an error.
    #[must_use]
    pub fn with_fetch_error(mut self, error: &str) -> Self {
        self.fetch_error = Some(error.to_string());
        self
    }

    /// Calls made so far, as `"<operation> <args>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Whether any recorded call starts with `operation`.
    pub fn was_called(&self, operation: &str) -> bool {
        self.calls().iter().any(|c| c.split(' ').next() == Some(operation))
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl BranchOperations for MockBranchOperations {
    fn current_branch(&self) -> Result<Option<String>> {
        Ok(self.current.lock().map(|c| c.clone()).unwrap_or_default())
    }

    fn fetch_branch(&self, remote: &str, branch: &str) -> Result<()> {
        self.record(format!("fetch {remote} {branch}"));
        match &self.fetch_error {
            Some(error) => bail!("{}", error),
            None => Ok(()),
        }
    }

    fn local_branch_exists(&self, branch: &str) -> Result<bool> {
        Ok(self
            .local_branches
            .lock()
            .map(|b| b.contains(branch))
            .unwrap_or(false))
    }

    fn checkout(&self, branch: &str) -> Result<()> {
        self.record(format!("checkout {branch}"));
        if !self.local_branch_exists(branch)? {
            bail!("pathspec '{}' did not match any branch", branch);
        }
        if let Ok(mut current) = self.current.lock() {
            *current = Some(branch.to_string());
        }
        Ok(())
    }

    fn create_tracking_branch(&self, branch: &str, remote_ref: &str) -> Result<()> {
        self.record(format!("create_tracking_branch {branch} {remote_ref}"));
        if let Ok(mut branches) = self.local_branches.lock() {
            branches.insert(branch.to_string());
        }
        if let Ok(mut current) = self.current.lock() {
            *current = Some(branch.to_string());
        }
        Ok(())
    }

    fn rebase_onto(&self, upstream: &str) -> Result<RebaseOutcome> {
        self.record(format!("rebase {upstream}"));
        if self.conflicts.is_empty() {
            Ok(RebaseOutcome::Clean)
        } else {
            Ok(RebaseOutcome::Conflicts(self.conflicts.clone()))
        }
    }

    fn abort_rebase(&self) -> Result<()> {
        self.record("abort_rebase".to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_defaults() {
        let git = MockBranchOperations::new();
        assert_eq!(git.current_branch().unwrap().as_deref(), Some("main"));
        assert!(git.local_branch_exists("main").unwrap());
        assert!(!git.local_branch_exists("other").unwrap());
        assert!(git.calls().is_empty());
    }

    #[test]
    fn test_mock_checkout_unknown_branch_fails() {
        let git = MockBranchOperations::new();
        assert!(git.checkout("nope").is_err());
    }

    #[test]
    fn test_mock_tracking_branch_switches() {
        let git = MockBranchOperations::new();
        git.create_tracking_branch("P3-x", "origin/P3-x").unwrap();
        assert_eq!(git.current_branch().unwrap().as_deref(), Some("P3-x"));
        assert!(git.was_called("create_tracking_branch"));
    }

    #[test]
    fn test_mock_fetch_error() {
        let git = MockBranchOperations::new().with_fetch_error("network unreachable");
        let err = git.fetch_branch("origin", "x").unwrap_err();
        assert!(err.to_string().contains("network unreachable"));
    }

    #[test]
    fn test_mock_rebase_conflicts() {
        let git = MockBranchOperations::new().with_rebase_conflicts(&["src/lib.rs"]);
        assert_eq!(
            git.rebase_onto("origin/x").unwrap(),
            RebaseOutcome::Conflicts(vec!["src/lib.rs".to_string()])
        );
    }
}

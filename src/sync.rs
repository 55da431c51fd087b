//! Bring a plan's working branch up to date with its remote.
//!
//! Fetch, switch to the branch (creating a tracking branch when it only
//! exists remotely), then rebase. A freshly created tracking branch already
//! matches the remote, so it is not rebased. Conflicts are never resolved
//! automatically: the rebase is aborted and [`PlanError::SyncConflict`]
//! carries the conflicted paths back to the caller.

use tracing::{info, warn};

use crate::error::{PlanError, ProviderContext, Result};
use crate::git::{BranchOperations, RebaseOutcome};

/// What [`sync_branch`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncOutcome {
    /// A local tracking branch was created from the remote
    pub created_tracking_branch: bool,
    /// The working copy was switched to the branch
    pub switched: bool,
    /// The branch was rebased onto its remote
    pub rebased: bool,
}

/// Sync `branch` with `remote`.
///
/// # Errors
///
/// - [`PlanError::SyncConflict`] if the rebase hits conflicts (the rebase
///   is aborted first)
/// - [`PlanError::Provider`] if a git operation fails
pub fn sync_branch(git: &dyn BranchOperations, remote: &str, branch: &str) -> Result<SyncOutcome> {
    let mut outcome = SyncOutcome::default();
    let remote_ref = format!("{remote}/{branch}");

    git.fetch_branch(remote, branch).provider("git fetch")?;

    let current = git.current_branch().provider("git branch")?;
    if current.as_deref() != Some(branch) {
        if git.local_branch_exists(branch).provider("git show-ref")? {
            git.checkout(branch).provider("git checkout")?;
        } else {
            git.create_tracking_branch(branch, &remote_ref)
                .provider("git checkout --track")?;
            outcome.created_tracking_branch = true;
            info!("Created tracking branch '{}' from {}", branch, remote_ref);
        }
        outcome.switched = true;
    }

    if outcome.created_tracking_branch {
        return Ok(outcome);
    }

    match git.rebase_onto(&remote_ref).provider("git rebase")? {
        RebaseOutcome::Clean => {
            outcome.rebased = true;
            info!("Rebased '{}' onto {}", branch, remote_ref);
            Ok(outcome)
        }
        RebaseOutcome::Conflicts(paths) => {
            warn!("Rebase of '{}' hit {} conflict(s), aborting", branch, paths.len());
            if let Err(e) = git.abort_rebase() {
                warn!("Failed to abort rebase: {:#}", e);
            }
            Err(PlanError::SyncConflict {
                branch: branch.to_string(),
                message: format!("rebase onto {remote_ref} conflicts in {}", paths.join(", ")),
                conflicted_paths: paths,
            })
        }
    }
}

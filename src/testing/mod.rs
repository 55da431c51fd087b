//! Testing infrastructure for the plan store.
//!
//! # Architecture
//!
//! - **Mocks**: test doubles for collaborator traits with controllable behavior
//! - **Fixtures**: backends wired onto in-memory stores (test-only)
//!
//! Storage collaborators already have in-memory implementations in
//! [`store::memory`](crate::store::memory); tests run the real backends on
//! top of them.
//!
//! # Example
//!
//! ```
//! use planstore::git::BranchOperations;
//! use planstore::testing::MockBranchOperations;
//!
//! let git = MockBranchOperations::new()
//!     .with_current_branch("P3-add-retries")
//!     .with_rebase_conflicts(&["src/lib.rs"]);
//! assert!(git.local_branch_exists("P3-add-retries").unwrap());
//! ```

#[cfg(test)]
pub mod fixtures;
pub mod mocks;

#[cfg(test)]
pub use fixtures::*;
pub use mocks::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PlanBackend;
    use crate::metadata::parse_block;
    use crate::plan::{LifecycleStage, PlanId};
    use crate::store::{ContainerStore, NewContainer};

    // =========================================================================
    // Fixture Tests
    // =========================================================================

    #[test]
    fn test_fixture_builds_every_provider() {
        let fixture = BackendFixture::new();
        let providers: Vec<_> = fixture.all_backends().iter().map(|b| b.provider()).collect();
        assert_eq!(providers.len(), 3);
        for backend in fixture.all_backends() {
            let plan = backend.create_plan(BackendFixture::new_plan("Fixture plan")).unwrap();
            assert_eq!(plan.provider, backend.provider());
        }
    }

    #[test]
    fn test_legacy_body_reads_as_current_schema() {
        let header = parse_block(&legacy_v1_header_body()).unwrap().unwrap();
        assert_eq!(header.schema_version(), Some(2));
        assert_eq!(header.objective_id(), Some(PlanId::Number(7)));
        assert_eq!(header.created_from_session(), Some("legacy-session"));
        assert_eq!(header.lifecycle_stage(), LifecycleStage::Planned);
    }

    #[test]
    fn test_legacy_issue_is_readable_through_backend() {
        let fixture = BackendFixture::new();
        fixture
            .containers
            .create(NewContainer::issue("Old plan", legacy_v1_header_body()))
            .unwrap();
        let plan = fixture.issues().get_plan(&PlanId::Number(1)).unwrap().unwrap();
        assert_eq!(plan.objective_id, Some(PlanId::Number(7)));
    }
}

//! Test fixtures wiring backends onto in-memory stores.

use std::sync::Arc;

use crate::backend::{
    BackendOptions, DraftPrBackend, IssueBackend, PlanBackend, StoreClients, TicketBackend,
};
use crate::config::StoreConfig;
use crate::metadata::MetadataPatch;
use crate::plan::{NewPlan, Provider};
use crate::session::InMemoryMarkerStore;
use crate::store::{MemoryContainerStore, MemoryTicketTracker};

/// In-memory stores plus a marker store, shared by every backend built
/// from the fixture.
///
/// # Example
///
/// ```rust,ignore
/// let fixture = BackendFixture::new();
/// let plan = fixture.issues().create_plan(BackendFixture::new_plan("Add retries")).unwrap();
/// assert_eq!(fixture.containers.container_count(), 1);
/// ```
pub struct BackendFixture {
    pub containers: Arc<MemoryContainerStore>,
    pub tickets: Arc<MemoryTicketTracker>,
    pub markers: InMemoryMarkerStore,
}

impl BackendFixture {
    #[must_use]
    pub fn new() -> Self {
        Self {
            containers: Arc::new(MemoryContainerStore::new().with_author("octocat")),
            tickets: Arc::new(MemoryTicketTracker::new()),
            markers: InMemoryMarkerStore::new(),
        }
    }

    pub fn issues(&self) -> IssueBackend {
        IssueBackend::new(self.containers.clone(), BackendOptions::default())
    }

    pub fn draft_prs(&self) -> DraftPrBackend {
        DraftPrBackend::new(self.containers.clone(), BackendOptions::default())
    }

    pub fn ticket_backend(&self) -> TicketBackend {
        TicketBackend::new(self.tickets.clone(), BackendOptions::default())
    }

    pub fn clients(&self) -> StoreClients {
        StoreClients {
            containers: self.containers.clone(),
            tickets: self.tickets.clone(),
        }
    }

    /// One backend per provider, built through the factory.
    pub fn all_backends(&self) -> Vec<Box<dyn PlanBackend>> {
        let config = StoreConfig::default();
        [Provider::Issues, Provider::DraftPr, Provider::Tickets]
            .into_iter()
            .map(|p| crate::backend::load_backend(p, &config, &self.clients()))
            .collect()
    }

    /// A plan every backend accepts; carries a branch for draft PRs.
    pub fn new_plan(title: &str) -> NewPlan {
        let branch = crate::plan::identity::slugify(title, 30);
        NewPlan::new(title, format!("# {title}\n\n1. First step\n2. Second step"), "octocat")
            .with_metadata(MetadataPatch::new().set("branch_name", format!("plan/{branch}")))
    }
}

impl Default for BackendFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Issue body written by the v1 schema: old key names, string version.
pub fn legacy_v1_header_body() -> String {
    [
        "<!-- planstore:metadata-block:plan-header -->",
        "<details>",
        "<summary><code>plan-header</code></summary>",
        "",
        "```json",
        r#"{"schema_version": "1", "created_at": "2024-11-02T09:15:00+00:00", "created_by": "octocat", "lifecycle_stage": "planned", "objective_issue": 7, "session_id": "legacy-session"}"#,
        "```",
        "",
        "</details>",
        "<!-- /planstore:metadata-block:plan-header -->",
    ]
    .join("\n")
}

//! Idempotent plan creation.
//!
//! A retried save must not create a second plan. Two tiers guard it:
//!
//! 1. A reusable session marker `created-plan:<digest>` naming the plan
//!    already created for that content.
//! 2. When the marker is gone (another machine, cleared scratch), a
//!    provider query for plans whose `created_from_session` and
//!    `content_digest` both match.
//!
//! Only when both miss is a new plan created.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::PlanBackend;
use crate::error::{PlanError, Result};
use crate::metadata::{content_digest, fields};
use crate::plan::{NewPlan, Plan, PlanId, PlanQuery};
use crate::session::{MarkerKind, MarkerStore};
use crate::staging::ContentStaging;

/// Prefix of the dedup marker name.
pub const CREATED_PLAN_MARKER: &str = "created-plan";

/// Marker name for content with `digest`.
pub fn created_plan_marker(digest: &str) -> String {
    format!("{CREATED_PLAN_MARKER}:{digest}")
}

/// Result of [`create_plan_once`].
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOutcome {
    pub plan: Plan,
    /// `false` when an existing plan was returned
    pub created: bool,
}

/// Create `new` unless this session already created a plan with the same
/// content.
///
/// `created_from_session` is set on the new plan so the provider-side
/// lookup can find it later.
pub fn create_plan_once(
    backend: &dyn PlanBackend,
    markers: &dyn MarkerStore,
    session_id: &str,
    new: NewPlan,
) -> Result<CreateOutcome> {
    let digest = content_digest(&new.content);
    let marker_name = created_plan_marker(&digest);

    if let Some(marker) = markers.read(session_id, &marker_name)? {
        match serde_json::from_str::<PlanId>(&marker.value) {
            Ok(id) => match backend.get_plan(&id)? {
                Some(plan) => {
                    info!("Plan {} already created in this session", plan.id);
                    return Ok(CreateOutcome {
                        plan,
                        created: false,
                    });
                }
                None => warn!("Marker points at missing plan {}, looking further", id),
            },
            Err(e) => warn!("Ignoring unreadable marker {}: {}", marker_name, e),
        }
    }

    let query = PlanQuery::default().from_session(session_id);
    let existing = backend
        .list_plans(&query)?
        .into_iter()
        .find(|p| p.header_fields.content_digest() == Some(digest.as_str()));
    if let Some(found) = existing {
        debug!("Found plan {} for session {} by provider query", found.id, session_id);
        let plan = backend
            .get_plan(&found.id)?
            .ok_or_else(|| PlanError::NotFound { id: found.id.clone() })?;
        record(markers, session_id, &marker_name, &plan.id)?;
        return Ok(CreateOutcome {
            plan,
            created: false,
        });
    }

    let metadata = if new.metadata.get(fields::CREATED_FROM_SESSION).is_some() {
        new.metadata.clone()
    } else {
        new.metadata
            .clone()
            .set(fields::CREATED_FROM_SESSION, Value::from(session_id))
    };
    let plan = backend.create_plan(new.with_metadata(metadata))?;
    record(markers, session_id, &marker_name, &plan.id)?;
    Ok(CreateOutcome {
        plan,
        created: true,
    })
}

fn record(markers: &dyn MarkerStore, session_id: &str, name: &str, id: &PlanId) -> Result<()> {
    let value = serde_json::to_string(id)?;
    markers.put(session_id, name, MarkerKind::Reusable, &value)
}

/// Create a plan from the content staged for `session_id`, once.
///
/// The resulting plan reference is written back to staging so the
/// implementing side can pick it up.
///
/// # Errors
///
/// Returns [`PlanError::Validation`] if nothing is staged for the session.
pub fn save_staged_plan(
    backend: &dyn PlanBackend,
    markers: &dyn MarkerStore,
    staging: &dyn ContentStaging,
    session_id: &str,
    new: NewPlan,
) -> Result<CreateOutcome> {
    let content = staging
        .staged_content(session_id)?
        .ok_or_else(|| PlanError::validation("content", format!("nothing staged for session {session_id}")))?;
    let outcome = create_plan_once(backend, markers, session_id, NewPlan { content, ..new })?;
    staging.record_plan_ref(session_id, &outcome.plan.plan_ref())?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOptions, IssueBackend};
    use crate::session::InMemoryMarkerStore;
    use crate::store::MemoryContainerStore;
    use std::sync::Arc;

    fn setup() -> (IssueBackend, Arc<MemoryContainerStore>, InMemoryMarkerStore) {
        let store = Arc::new(MemoryContainerStore::new());
        let backend = IssueBackend::new(store.clone(), BackendOptions::default());
        (backend, store, InMemoryMarkerStore::new())
    }

    #[test]
    fn test_marker_name() {
        assert_eq!(created_plan_marker("abc"), "created-plan:abc");
    }

    #[test]
    fn test_second_call_returns_same_plan() {
        let (backend, store, markers) = setup();
        let first = create_plan_once(&backend, &markers, "s1", NewPlan::new("t", "c", "u")).unwrap();
        let second = create_plan_once(&backend, &markers, "s1", NewPlan::new("t", "c", "u")).unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.plan.id, second.plan.id);
        assert_eq!(store.container_count(), 1);
        assert_eq!(
            first.plan.header_fields.created_from_session(),
            Some("s1")
        );
    }

    #[test]
    fn test_provider_query_used_when_marker_missing() {
        let (backend, store, markers) = setup();
        let first = create_plan_once(&backend, &markers, "s1", NewPlan::new("t", "c", "u")).unwrap();
        markers.clear_session("s1").unwrap();

        let again = create_plan_once(&backend, &markers, "s1", NewPlan::new("t", "c", "u")).unwrap();
        assert!(!again.created);
        assert_eq!(again.plan.id, first.plan.id);
        assert_eq!(store.container_count(), 1);
        assert!(markers.read("s1", &created_plan_marker(&content_digest("c"))).unwrap().is_some());
    }

    #[test]
    fn test_different_content_creates_new_plan() {
        let (backend, store, markers) = setup();
        create_plan_once(&backend, &markers, "s1", NewPlan::new("t", "one", "u")).unwrap();
        let other = create_plan_once(&backend, &markers, "s1", NewPlan::new("t", "two", "u")).unwrap();
        assert!(other.created);
        assert_eq!(store.container_count(), 2);
    }
}

//! End-to-end plan scenarios over the in-memory stores.

use std::sync::Arc;

use planstore::backend::pr_body::PrBody;
use planstore::backend::{BackendOptions, DraftPrBackend, IssueBackend, PlanBackend};
use planstore::consolidation::{self, ConsolidationKind};
use planstore::dedup::{create_plan_once, save_staged_plan};
use planstore::metadata::{extract_block, fields, MetadataPatch};
use planstore::plan::{LifecycleStage, NewPlan, PlanId, PlanQuery};
use planstore::session::{FileMarkerStore, InMemoryMarkerStore, MarkerStore};
use planstore::staging::{ContentStaging, FileContentStaging};
use planstore::store::{ContainerStore, MemoryContainerStore, NewContainer};
use planstore::PlanError;
use tempfile::TempDir;

const CONSOLIDATED: &str = "planstore-consolidated";

fn issue_backend() -> (IssueBackend, Arc<MemoryContainerStore>) {
    let store = Arc::new(MemoryContainerStore::new().with_author("octocat"));
    (IssueBackend::new(store.clone(), BackendOptions::default()), store)
}

fn pr_backend() -> (DraftPrBackend, Arc<MemoryContainerStore>) {
    let store = Arc::new(MemoryContainerStore::new().with_author("octocat"));
    (DraftPrBackend::new(store.clone(), BackendOptions::default()), store)
}

fn pr_plan(title: &str, branch: &str) -> NewPlan {
    NewPlan::new(title, "## Steps\n\n1. Parse\n2. Validate\n3. Store", "octocat")
        .with_metadata(MetadataPatch::new().set(fields::BRANCH_NAME, branch))
}

#[test]
fn test_pull_request_plan_moves_to_implementing() {
    let (backend, store) = pr_backend();
    let plan = backend.create_plan(pr_plan("Import pipeline", "plan/import")).unwrap();
    let number = plan.id.as_number().unwrap();

    // Created without a footer; the footer needs the assigned number.
    let created = store.created_body(number).unwrap();
    assert!(PrBody::split(&created).footer.is_none());
    assert!(!created.contains("planstore checkout"));

    let before = store.get(number).unwrap().unwrap().body;
    assert!(before.contains(&format!("planstore checkout {number}")));

    backend
        .update_metadata(&plan.id, MetadataPatch::new().stage(LifecycleStage::Implementing))
        .unwrap();
    let after = store.get(number).unwrap().unwrap().body;

    let (range_before, _) = extract_block(&before).unwrap();
    let (range_after, _) = extract_block(&after).unwrap();
    assert_eq!(before[..range_before.start], after[..range_after.start]);
    assert_eq!(before[range_before.end..], after[range_after.end..]);

    let old_lines: Vec<&str> = before[range_before].lines().collect();
    let new_lines: Vec<&str> = after[range_after].lines().collect();
    assert_eq!(old_lines.len(), new_lines.len());
    let changed: Vec<(&&str, &&str)> = old_lines
        .iter()
        .zip(new_lines.iter())
        .filter(|(a, b)| a != b)
        .collect();
    assert_eq!(changed.len(), 1);
    assert!(changed[0].0.contains("\"lifecycle_stage\": \"planned\""));
    assert!(changed[0].1.contains("\"lifecycle_stage\": \"implementing\""));

    backend.set_summary(&plan.id, "Pipeline parses and stores records.").unwrap();
    let fetched = backend.get_plan(&plan.id).unwrap().unwrap();
    assert_eq!(fetched.content, plan.content);
    assert_eq!(fetched.lifecycle_stage, LifecycleStage::Implementing);
    let body = store.get(number).unwrap().unwrap().body;
    assert_eq!(PrBody::split(&body).summary(), Some("Pipeline parses and stores records."));
}

#[test]
fn test_pull_request_never_carries_closing_reference() {
    let (backend, store) = pr_backend();
    let target = backend.create_plan(pr_plan("Target", "plan/target")).unwrap();
    let other = backend.create_plan(pr_plan("Other", "plan/other")).unwrap();
    let number = other.id.as_number().unwrap();
    let before = store.get(number).unwrap().unwrap().body;

    store.reset_calls();
    for value in [
        other.id.to_value(),
        serde_json::json!(format!("#{number}")),
        target.id.to_value(),
    ] {
        let err = backend
            .update_metadata(&other.id, MetadataPatch::new().set(fields::CLOSING_REFERENCE, value))
            .unwrap_err();
        assert!(matches!(err, PlanError::Validation { .. }));
    }
    assert_eq!(store.call_count("update_body"), 0);
    assert_eq!(store.get(number).unwrap().unwrap().body, before);
    assert!(backend
        .get_plan(&other.id)
        .unwrap()
        .unwrap()
        .header_fields
        .closing_reference()
        .is_none());
}

#[test]
fn test_issue_reads_use_direct_comment_reference() {
    let (backend, store) = issue_backend();
    let plan = backend
        .create_plan(NewPlan::new("Cache warmup", "1. Warm\n2. Verify", "octocat"))
        .unwrap();
    assert!(plan.header_fields.plan_comment_id().is_some());

    store.reset_calls();
    let fetched = backend.get_plan(&plan.id).unwrap().unwrap();
    assert_eq!(fetched.content, "1. Warm\n2. Verify");
    assert_eq!(store.call_count("get_comment"), 1);
    assert_eq!(store.call_count("list_comments"), 0);

    store.reset_calls();
    backend.get_metadata_field(&plan.id, fields::LIFECYCLE_STAGE).unwrap();
    assert_eq!(store.call_count("get_comment"), 0);
    assert_eq!(store.call_count("list_comments"), 0);
}

fn legacy_v1_body() -> String {
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

#[test]
fn test_legacy_plan_reads_and_heals() {
    let (backend, store) = issue_backend();
    let issue = store
        .create(
            NewContainer::issue("Legacy plan", legacy_v1_body())
                .with_labels(vec!["planstore-plan".to_string()]),
        )
        .unwrap();
    let status = store
        .seed_comment(issue.number, "triage-bot", "status: picked up")
        .unwrap();
    let id = PlanId::Number(issue.number);

    let plan = backend.get_plan(&id).unwrap().unwrap();
    assert_eq!(plan.content, "");
    assert_eq!(plan.lifecycle_stage, LifecycleStage::Planned);
    assert_eq!(plan.objective_id, Some(PlanId::Number(7)));
    assert_eq!(plan.header_fields.created_from_session(), Some("legacy-session"));
    assert_eq!(
        backend.get_metadata_field(&id, "objective_issue").unwrap().value(),
        Some(&serde_json::json!(7))
    );

    backend.update_plan_content(&id, "1. Rewritten").unwrap();
    let healed = backend.get_plan(&id).unwrap().unwrap();
    assert!(healed.header_fields.plan_comment_id().is_some());
    assert_eq!(healed.content, "1. Rewritten");
    assert_ne!(healed.header_fields.plan_comment_id(), Some(PlanId::Number(status)));
    assert_eq!(
        store.get_comment(status).unwrap().unwrap().body,
        "status: picked up"
    );

    // The header is now written in the current shape.
    let body = store.get(issue.number).unwrap().unwrap().body;
    assert!(body.contains("\"objective_id\": 7"));
    assert!(!body.contains("objective_issue"));
    assert!(body.contains("\"schema_version\": 2"));

    store.reset_calls();
    backend.get_plan(&id).unwrap();
    assert_eq!(store.call_count("list_comments"), 0);
}

#[test]
fn test_consolidated_plan_is_never_consolidated_again() {
    let (backend, _) = issue_backend();
    let markers = InMemoryMarkerStore::new();
    let ids: Vec<PlanId> = ["Auth", "Sessions", "Tokens"]
        .iter()
        .map(|t| backend.create_plan(NewPlan::new(*t, format!("{t} steps"), "octocat")).unwrap().id)
        .collect();

    let merged = consolidation::consolidate(
        &backend,
        &markers,
        CONSOLIDATED,
        &ids[..2],
        NewPlan::new("Auth and sessions", "merged steps", "octocat"),
        "merge-1",
    )
    .unwrap();
    assert_eq!(merged.kind, ConsolidationKind::Merge);
    assert_eq!(merged.closed, ids[..2].to_vec());

    let candidates: Vec<PlanId> = consolidation::candidates(&backend, CONSOLIDATED)
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(candidates, vec![ids[2].clone()]);

    let err = consolidation::consolidate(
        &backend,
        &markers,
        CONSOLIDATED,
        &[merged.plan.id.clone(), ids[2].clone()],
        NewPlan::new("Everything", "all steps", "octocat"),
        "merge-2",
    )
    .unwrap_err();
    assert!(matches!(err, PlanError::Lifecycle { .. }));
    assert!(!backend.get_plan(&ids[2]).unwrap().unwrap().is_closed());

    let replanned = consolidation::replan(
        &backend,
        &markers,
        &ids[2],
        NewPlan::new("Tokens v2", "token steps v2", "octocat"),
        "replan-1",
    )
    .unwrap();
    assert!(consolidation::is_candidate(&replanned.plan, CONSOLIDATED));
}

#[test]
fn test_retried_save_creates_one_plan() {
    let (backend, store) = issue_backend();
    let temp = TempDir::new().unwrap();
    let markers = FileMarkerStore::new(temp.path().join("sessions"));
    let staging = FileContentStaging::new(temp.path().join("scratch"));

    staging.stage_content("sess-42", "1. Do the thing").unwrap();
    let first = save_staged_plan(
        &backend,
        &markers,
        &staging,
        "sess-42",
        NewPlan::new("Thing", "", "octocat"),
    )
    .unwrap();
    let second = save_staged_plan(
        &backend,
        &markers,
        &staging,
        "sess-42",
        NewPlan::new("Thing", "", "octocat"),
    )
    .unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.plan.id, second.plan.id);
    assert_eq!(store.container_count(), 1);
    assert_eq!(staging.plan_ref("sess-42").unwrap().unwrap().id, first.plan.id);

    // Markers lost: the provider query still finds the plan.
    markers.clear_session("sess-42").unwrap();
    let third = create_plan_once(
        &backend,
        &markers,
        "sess-42",
        NewPlan::new("Thing", "1. Do the thing", "octocat"),
    )
    .unwrap();
    assert!(!third.created);
    assert_eq!(third.plan.id, first.plan.id);

    let from_session = backend
        .list_plans(&PlanQuery::default().from_session("sess-42"))
        .unwrap();
    assert_eq!(from_session.len(), 1);
}

#[test]
fn test_nothing_staged_is_rejected() {
    let (backend, store) = issue_backend();
    let temp = TempDir::new().unwrap();
    let markers = InMemoryMarkerStore::new();
    let staging = FileContentStaging::new(temp.path());

    let err = save_staged_plan(&backend, &markers, &staging, "empty", NewPlan::new("t", "", "u"))
        .unwrap_err();
    assert!(matches!(err, PlanError::Validation { .. }));
    assert_eq!(store.container_count(), 0);
}

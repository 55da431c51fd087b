//! Issue-backed plans.
//!
//! The issue body holds only the `plan-header` block. The plan text lives in
//! a companion comment bracketed by plan-body markers, and the header's
//! `plan_comment_id` points straight at it. Plans created before that field
//! existed are found by scanning the comment list (the slow path), after
//! which the reference is written back so the scan happens once.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    creation_header, ensure_accepts, merge_update, plan_labels, BackendOptions, CommentId,
    FieldLookup, PlanBackend,
};
use crate::error::{PlanError, ProviderContext, Result};
use crate::metadata::{fields, parse_block, render_block, replace_block, HeaderFields, MetadataPatch};
use crate::plan::identity::issue_number_from_branch;
use crate::plan::{NewPlan, Plan, PlanId, PlanQuery, PlanState, Provider};
use crate::store::{Comment, Container, ContainerFilter, ContainerKind, ContainerState, ContainerStore, NewContainer};

/// Opening marker of the plan-body comment.
pub const PLAN_BODY_START: &str = "<!-- planstore:plan-body -->";

/// Closing marker of the plan-body comment.
pub const PLAN_BODY_END: &str = "<!-- /planstore:plan-body -->";

/// Wrap plan text for the companion comment.
pub fn render_plan_comment(content: &str) -> String {
    format!("{PLAN_BODY_START}\n{content}\n{PLAN_BODY_END}")
}

/// Plan text from a companion comment.
///
/// Comments without markers predate them and are taken whole.
pub fn extract_plan_comment(body: &str) -> String {
    let Some(start) = body.find(PLAN_BODY_START) else {
        return body.to_string();
    };
    let inner = &body[start + PLAN_BODY_START.len()..];
    let inner = inner.find(PLAN_BODY_END).map_or(inner, |end| &inner[..end]);
    inner.strip_prefix('\n').unwrap_or(inner).trim_end_matches('\n').to_string()
}

/// Whether an unmarked first comment is the plan text of an old plan.
///
/// Only the plan's creator wrote those, and they carry no planstore block
/// of any other kind.
fn is_unmarked_plan_text(comment: &Comment, header: &HeaderFields) -> bool {
    header.created_by() == Some(comment.author.as_str()) && !comment.body.contains(BLOCK_MARKER_PREFIX)
}

/// Common prefix of every planstore comment marker.
const BLOCK_MARKER_PREFIX: &str = "<!-- planstore:";

/// Plan backend over issues.
pub struct IssueBackend {
    store: Arc<dyn ContainerStore>,
    options: BackendOptions,
}

impl IssueBackend {
    pub fn new(store: Arc<dyn ContainerStore>, options: BackendOptions) -> Self {
        Self { store, options }
    }

    fn number(&self, id: &PlanId) -> Result<u64> {
        ensure_accepts(Provider::Issues, id)?;
        id.as_number()
            .ok_or_else(|| PlanError::mismatch(Provider::Issues, format!("id {id}")))
    }

    /// Fetch an issue that carries a plan header.
    fn fetch(&self, number: u64) -> Result<Option<(Container, HeaderFields)>> {
        let Some(container) = self.store.get(number).provider("get issue")? else {
            return Ok(None);
        };
        if container.kind != ContainerKind::Issue {
            return Err(PlanError::mismatch(
                Provider::Issues,
                format!("pull request #{number}"),
            ));
        }
        Ok(parse_block(&container.body)?.map(|header| (container, header)))
    }

    fn fetch_existing(&self, id: &PlanId) -> Result<(u64, Container, HeaderFields)> {
        let number = self.number(id)?;
        let (container, header) = self
            .fetch(number)?
            .ok_or_else(|| PlanError::NotFound { id: id.clone() })?;
        Ok((number, container, header))
    }

    /// Locate the content comment.
    ///
    /// Returns the comment and whether it was reached through the direct
    /// reference.
    fn find_plan_comment(&self, number: u64, header: &HeaderFields) -> Result<Option<(Comment, bool)>> {
        if let Some(comment_id) = header.plan_comment_id().and_then(|id| id.as_number()) {
            match self.store.get_comment(comment_id).provider("get comment")? {
                Some(comment) if comment.container == number => return Ok(Some((comment, true))),
                _ => warn!(
                    "Plan comment {} of issue #{} is missing, scanning comments",
                    comment_id, number
                ),
            }
        }

        debug!("Issue #{} has no plan comment reference, scanning comments", number);
        let comments = self.store.list_comments(number).provider("list comments")?;
        let marked = comments.iter().position(|c| c.body.contains(PLAN_BODY_START));
        let found = match marked {
            Some(idx) => comments.into_iter().nth(idx),
            None => comments
                .into_iter()
                .next()
                .filter(|c| is_unmarked_plan_text(c, header)),
        };
        Ok(found.map(|c| (c, false)))
    }

    /// Write `header` back into the issue body.
    fn write_header(&self, number: u64, body: &str, header: &HeaderFields) -> Result<()> {
        let block = render_block(header)?;
        self.store
            .update_body(number, &replace_block(body, &block))
            .provider("update issue body")
    }

    fn to_plan(&self, container: Container, header: HeaderFields, content: String) -> Plan {
        let state = if container.state.is_open() {
            PlanState::Open
        } else {
            PlanState::Closed
        };
        Plan::assemble(
            Provider::Issues,
            PlanId::Number(container.number),
            container.title,
            content,
            header,
        )
        .with_state(state)
        .with_labels(container.labels)
        .with_url(Some(container.url))
    }
}

impl PlanBackend for IssueBackend {
    fn provider(&self) -> Provider {
        Provider::Issues
    }

    fn get_plan(&self, id: &PlanId) -> Result<Option<Plan>> {
        let number = self.number(id)?;
        let Some((container, header)) = self.fetch(number)? else {
            return Ok(None);
        };
        let content = self
            .find_plan_comment(number, &header)?
            .map(|(c, _)| extract_plan_comment(&c.body))
            .unwrap_or_default();
        Ok(Some(self.to_plan(container, header, content)))
    }

    fn list_plans(&self, query: &PlanQuery) -> Result<Vec<Plan>> {
        let filter = ContainerFilter {
            kind: Some(ContainerKind::Issue),
            labels: plan_labels(&self.options, &query.labels),
            state: query.state.map(|s| match s {
                PlanState::Open => ContainerState::Open,
                PlanState::Closed => ContainerState::Closed,
            }),
        };
        let mut plans = Vec::new();
        for container in self.store.list(&filter).provider("list issues")? {
            match parse_block(&container.body) {
                Ok(Some(header)) => plans.push(self.to_plan(container, header, String::new())),
                Ok(None) => {}
                Err(e) => warn!("Skipping issue #{} with unreadable header: {}", container.number, e),
            }
        }
        Ok(query.apply(plans))
    }

    fn get_metadata_field(&self, id: &PlanId, name: &str) -> Result<FieldLookup> {
        let number = self.number(id)?;
        Ok(match self.fetch(number)? {
            Some((_, header)) => FieldLookup::from_header(&header, name),
            None => FieldLookup::PlanNotFound,
        })
    }

    fn create_plan(&self, new: NewPlan) -> Result<Plan> {
        let mut header = creation_header(&new, &self.options)?;
        let body = render_block(&header)?;
        let container = self
            .store
            .create(NewContainer::issue(&new.title, &body).with_labels(plan_labels(&self.options, &new.labels)))
            .provider("create issue")?;
        let number = container.number;

        let comment_id = self
            .store
            .add_comment(number, &render_plan_comment(&new.content))
            .provider("add plan comment")?;
        header.set(fields::PLAN_COMMENT_ID, Value::from(comment_id));
        self.write_header(number, &body, &header)?;

        info!("Created plan issue #{}", number);
        Ok(self.to_plan(container, header, new.content))
    }

    fn update_metadata(&self, id: &PlanId, patch: MetadataPatch) -> Result<()> {
        let (number, container, header) = self.fetch_existing(id)?;
        let state = if container.state.is_open() {
            PlanState::Open
        } else {
            PlanState::Closed
        };
        let merged = merge_update(id, state, &header, &patch)?;
        if merged == header {
            return Ok(());
        }
        self.write_header(number, &container.body, &merged)
    }

    fn update_plan_content(&self, id: &PlanId, content: &str) -> Result<()> {
        let (number, container, header) = self.fetch_existing(id)?;
        if !container.state.is_open() {
            return Err(PlanError::lifecycle(id.clone(), "plan is closed"));
        }
        let body = render_plan_comment(content);

        match self.find_plan_comment(number, &header)? {
            Some((comment, true)) => self
                .store
                .update_comment(comment.id, &body)
                .provider("update plan comment"),
            Some((comment, false)) => {
                self.store
                    .update_comment(comment.id, &body)
                    .provider("update plan comment")?;
                info!("Recorded plan comment {} on issue #{}", comment.id, number);
                let mut healed = header;
                healed.set(fields::PLAN_COMMENT_ID, Value::from(comment.id));
                self.write_header(number, &container.body, &healed)
            }
            None => {
                let comment_id = self
                    .store
                    .add_comment(number, &body)
                    .provider("add plan comment")?;
                let mut healed = header;
                healed.set(fields::PLAN_COMMENT_ID, Value::from(comment_id));
                self.write_header(number, &container.body, &healed)
            }
        }
    }

    fn add_comment(&self, id: &PlanId, text: &str) -> Result<CommentId> {
        let (number, _, _) = self.fetch_existing(id)?;
        let comment_id = self.store.add_comment(number, text).provider("add comment")?;
        Ok(CommentId::Number(comment_id))
    }

    fn close_plan(&self, id: &PlanId) -> Result<()> {
        let (number, container, _) = self.fetch_existing(id)?;
        if !container.state.is_open() {
            debug!("Issue #{} already closed", number);
            return Ok(());
        }
        self.store.close(number).provider("close issue")
    }

    fn add_label(&self, id: &PlanId, label: &str) -> Result<()> {
        let (number, _, _) = self.fetch_existing(id)?;
        self.store.add_label(number, label).provider("add label")
    }

    fn remove_label(&self, id: &PlanId, label: &str) -> Result<()> {
        let (number, _, _) = self.fetch_existing(id)?;
        self.store.remove_label(number, label).provider("remove label")
    }

    fn resolve_branch(&self, branch: &str) -> Result<Option<PlanId>> {
        Ok(issue_number_from_branch(branch).map(PlanId::Number))
    }

    fn closing_reference(&self, id: &PlanId) -> Option<String> {
        id.as_number().map(|n| format!("Closes #{n}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::LifecycleStage;
    use crate::store::MemoryContainerStore;
    use serde_json::json;

    fn backend() -> (IssueBackend, Arc<MemoryContainerStore>) {
        let store = Arc::new(MemoryContainerStore::new());
        (IssueBackend::new(store.clone(), BackendOptions::default()), store)
    }

    #[test]
    fn test_plan_comment_roundtrip() {
        let body = render_plan_comment("# Plan\n\n- step");
        assert_eq!(extract_plan_comment(&body), "# Plan\n\n- step");
        assert_eq!(extract_plan_comment("legacy text"), "legacy text");
    }

    #[test]
    fn test_create_records_comment_reference() {
        let (backend, store) = backend();
        let plan = backend
            .create_plan(NewPlan::new("Add retries", "1. retry", "octocat"))
            .unwrap();
        assert_eq!(plan.id, PlanId::Number(1));
        assert!(plan.header_fields.plan_comment_id().is_some());
        assert!(plan.has_label("planstore-plan"));

        let fetched = backend.get_plan(&plan.id).unwrap().unwrap();
        assert_eq!(fetched.content, "1. retry");
        assert_eq!(store.call_count("list_comments"), 0);
    }

    #[test]
    fn test_get_metadata_field_skips_comments() {
        let (backend, store) = backend();
        let plan = backend.create_plan(NewPlan::new("t", "c", "u")).unwrap();
        store.reset_calls();
        assert_eq!(
            backend.get_metadata_field(&plan.id, "lifecycle_stage").unwrap(),
            FieldLookup::Value(json!("planned"))
        );
        assert_eq!(
            backend.get_metadata_field(&plan.id, "branch_name").unwrap(),
            FieldLookup::Unset
        );
        assert_eq!(
            backend.get_metadata_field(&PlanId::Number(99), "branch_name").unwrap(),
            FieldLookup::PlanNotFound
        );
        assert_eq!(store.call_count("list_comments"), 0);
        assert_eq!(store.call_count("get_comment"), 0);
    }

    #[test]
    fn test_update_content_uses_direct_reference() {
        let (backend, store) = backend();
        let plan = backend.create_plan(NewPlan::new("t", "old", "u")).unwrap();
        store.reset_calls();
        backend.update_plan_content(&plan.id, "new").unwrap();
        assert_eq!(store.call_count("list_comments"), 0);
        assert_eq!(backend.get_plan(&plan.id).unwrap().unwrap().content, "new");
    }

    #[test]
    fn test_legacy_plan_falls_back_and_self_heals() {
        let (backend, store) = backend();
        let plan = backend.create_plan(NewPlan::new("t", "old", "u")).unwrap();
        let mut header = plan.header_fields.clone();
        header.remove(fields::PLAN_COMMENT_ID);
        store.seed_body(1, &render_block(&header).unwrap()).unwrap();

        store.reset_calls();
        backend.update_plan_content(&plan.id, "new").unwrap();
        assert_eq!(store.call_count("list_comments"), 1);

        store.reset_calls();
        backend.update_plan_content(&plan.id, "newer").unwrap();
        assert_eq!(store.call_count("list_comments"), 0);
        assert_eq!(backend.get_plan(&plan.id).unwrap().unwrap().content, "newer");
    }

    #[test]
    fn test_unmarked_first_comment_by_creator_is_plan_text() {
        let (backend, store) = backend();
        let plan = backend.create_plan(NewPlan::new("t", "c", "local")).unwrap();
        let mut header = plan.header_fields.clone();
        header.remove(fields::PLAN_COMMENT_ID);
        store.seed_body(1, &render_block(&header).unwrap()).unwrap();
        let comment_id = header_comment(&plan);
        store.update_comment(comment_id, "1. legacy step").unwrap();

        assert_eq!(backend.get_plan(&plan.id).unwrap().unwrap().content, "1. legacy step");
    }

    #[test]
    fn test_foreign_first_comment_is_never_overwritten() {
        let (backend, store) = backend();
        let plan = backend.create_plan(NewPlan::new("t", "c", "local")).unwrap();
        let mut header = plan.header_fields.clone();
        header.remove(fields::PLAN_COMMENT_ID);
        store.seed_body(1, &render_block(&header).unwrap()).unwrap();
        // The creator's own comment, but it is another kind of block
        let comment_id = header_comment(&plan);
        let other_block = "<!-- planstore:metadata-block:review -->\nlooks good";
        store.update_comment(comment_id, other_block).unwrap();

        assert_eq!(backend.get_plan(&plan.id).unwrap().unwrap().content, "");
        backend.update_plan_content(&plan.id, "1. fresh").unwrap();

        assert_eq!(store.get_comment(comment_id).unwrap().unwrap().body, other_block);
        let healed = backend.get_plan(&plan.id).unwrap().unwrap();
        assert_eq!(healed.content, "1. fresh");
        assert_ne!(healed.header_fields.plan_comment_id(), Some(PlanId::Number(comment_id)));
    }

    fn header_comment(plan: &Plan) -> u64 {
        plan.header_fields.plan_comment_id().and_then(|id| id.as_number()).unwrap()
    }

    #[test]
    fn test_closed_plan_rejects_metadata_but_accepts_comments() {
        let (backend, _) = backend();
        let plan = backend.create_plan(NewPlan::new("t", "c", "u")).unwrap();
        backend.close_plan(&plan.id).unwrap();
        backend.close_plan(&plan.id).unwrap();

        let err = backend
            .update_metadata(&plan.id, MetadataPatch::new().stage(LifecycleStage::Implementing))
            .unwrap_err();
        assert!(matches!(err, PlanError::Lifecycle { .. }));
        assert!(backend.add_comment(&plan.id, "Superseded by #9").is_ok());
    }

    #[test]
    fn test_write_to_missing_plan_is_not_found() {
        let (backend, _) = backend();
        let err = backend
            .update_metadata(&PlanId::Number(5), MetadataPatch::new().set("branch_name", "x"))
            .unwrap_err();
        assert!(matches!(err, PlanError::NotFound { .. }));
    }

    #[test]
    fn test_resolve_branch_without_store_calls() {
        let (backend, store) = backend();
        assert_eq!(
            backend.resolve_branch("P12-add-retries-01-15-1430").unwrap(),
            Some(PlanId::Number(12))
        );
        assert_eq!(backend.resolve_branch("12-legacy").unwrap(), Some(PlanId::Number(12)));
        assert_eq!(backend.resolve_branch("feature/x").unwrap(), None);
        assert_eq!(store.call_count("get"), 0);
    }

    #[test]
    fn test_closing_reference() {
        let (backend, _) = backend();
        assert_eq!(
            backend.closing_reference(&PlanId::Number(4)).as_deref(),
            Some("Closes #4")
        );
    }

    #[test]
    fn test_ticket_key_is_mismatch() {
        let (backend, _) = backend();
        let err = backend.get_plan(&PlanId::Key("PLN-1".into())).unwrap_err();
        assert!(err.is_caller_bug());
    }
}

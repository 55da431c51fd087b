//! Ticket-tracker backed plans.
//!
//! Header fields live in the ticket's custom fields and the plan text in
//! its description, so the header can be read without the content. The
//! workflow state mirrors the lifecycle stage; the header stays the source
//! of truth.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, info, warn};

use super::{
    creation_header, ensure_accepts, merge_update, plan_labels, BackendOptions, CommentId,
    FieldLookup, PlanBackend,
};
use crate::error::{PlanError, ProviderContext, Result};
use crate::metadata::{HeaderFields, MetadataPatch};
use crate::plan::identity::slugify;
use crate::plan::{LifecycleStage, NewPlan, Plan, PlanId, PlanQuery, PlanState, Provider};
use crate::store::{NewTicket, Ticket, TicketTracker, WorkflowState};

/// Branch name of a ticket plan, e.g. `plan/PLN-1a2b3c4d-add-retries`.
pub const TICKET_BRANCH_PATTERN: &str = r"^plan/([A-Z][A-Z0-9]*-[0-9A-Za-z]+)(?:-|$)";

fn ticket_branch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(TICKET_BRANCH_PATTERN).expect("ticket branch pattern is valid"))
}

/// Branch name for the plan stored in ticket `key`.
pub fn ticket_branch_name(key: &str, title: &str) -> String {
    let slug = slugify(title, 30);
    if slug.is_empty() {
        format!("plan/{key}")
    } else {
        format!("plan/{key}-{slug}")
    }
}

/// Workflow state mirroring a lifecycle stage.
pub fn workflow_state_for(stage: LifecycleStage) -> WorkflowState {
    match stage {
        LifecycleStage::Planned => WorkflowState::Todo,
        LifecycleStage::Implementing => WorkflowState::InProgress,
        LifecycleStage::Implemented => WorkflowState::InReview,
    }
}

/// Plan backend over a ticket tracker.
pub struct TicketBackend {
    tracker: Arc<dyn TicketTracker>,
    options: BackendOptions,
}

impl TicketBackend {
    pub fn new(tracker: Arc<dyn TicketTracker>, options: BackendOptions) -> Self {
        Self { tracker, options }
    }

    fn key<'a>(&self, id: &'a PlanId) -> Result<&'a str> {
        ensure_accepts(Provider::Tickets, id)?;
        id.as_key()
            .ok_or_else(|| PlanError::mismatch(Provider::Tickets, format!("id {id}")))
    }

    /// Header of a ticket, or `None` for tickets that are not plans.
    fn header_of(fields: &std::collections::BTreeMap<String, serde_json::Value>) -> Result<Option<HeaderFields>> {
        if fields.is_empty() {
            return Ok(None);
        }
        HeaderFields::from_raw(fields.clone()).map(Some)
    }

    fn fetch(&self, key: &str) -> Result<Option<(Ticket, HeaderFields)>> {
        let Some(ticket) = self.tracker.get_ticket(key).provider("get ticket")? else {
            return Ok(None);
        };
        Ok(Self::header_of(&ticket.custom_fields)?.map(|header| (ticket, header)))
    }

    fn fetch_existing(&self, id: &PlanId) -> Result<(Ticket, HeaderFields)> {
        let key = self.key(id)?;
        self.fetch(key)?
            .ok_or_else(|| PlanError::NotFound { id: id.clone() })
    }

    fn to_plan(ticket: Ticket, header: HeaderFields) -> Plan {
        let state = if ticket.workflow_state.is_closed() {
            PlanState::Closed
        } else {
            PlanState::Open
        };
        Plan::assemble(
            Provider::Tickets,
            PlanId::Key(ticket.key),
            ticket.title,
            ticket.description,
            header,
        )
        .with_state(state)
        .with_labels(ticket.labels)
        .with_url(Some(ticket.url))
    }
}

impl PlanBackend for TicketBackend {
    fn provider(&self) -> Provider {
        Provider::Tickets
    }

    fn get_plan(&self, id: &PlanId) -> Result<Option<Plan>> {
        let key = self.key(id)?;
        Ok(self
            .fetch(key)?
            .map(|(ticket, header)| Self::to_plan(ticket, header)))
    }

    fn list_plans(&self, query: &PlanQuery) -> Result<Vec<Plan>> {
        let labels = plan_labels(&self.options, &query.labels);
        let mut plans = Vec::new();
        for ticket in self.tracker.list_tickets(&labels).provider("list tickets")? {
            match Self::header_of(&ticket.custom_fields) {
                Ok(Some(header)) => plans.push(Self::to_plan(ticket, header)),
                Ok(None) => {}
                Err(e) => warn!("Skipping ticket {} with unreadable fields: {}", ticket.key, e),
            }
        }
        Ok(query.apply(plans))
    }

    fn get_metadata_field(&self, id: &PlanId, name: &str) -> Result<FieldLookup> {
        let key = self.key(id)?;
        let Some(fields) = self.tracker.get_custom_fields(key).provider("get custom fields")? else {
            return Ok(FieldLookup::PlanNotFound);
        };
        Ok(match Self::header_of(&fields)? {
            Some(header) => FieldLookup::from_header(&header, name),
            None => FieldLookup::PlanNotFound,
        })
    }

    fn create_plan(&self, new: NewPlan) -> Result<Plan> {
        let header = creation_header(&new, &self.options)?;
        let ticket = self
            .tracker
            .create_ticket(NewTicket {
                title: new.title.clone(),
                description: new.content.clone(),
                workflow_state: workflow_state_for(LifecycleStage::Planned),
                custom_fields: header.clone().into_map(),
                labels: plan_labels(&self.options, &new.labels),
            })
            .provider("create ticket")?;
        info!("Created plan ticket {}", ticket.key);
        Ok(Self::to_plan(ticket, header))
    }

    fn update_metadata(&self, id: &PlanId, patch: MetadataPatch) -> Result<()> {
        let (ticket, header) = self.fetch_existing(id)?;
        let state = if ticket.workflow_state.is_closed() {
            PlanState::Closed
        } else {
            PlanState::Open
        };
        let merged = merge_update(id, state, &header, &patch)?;
        if merged == header {
            return Ok(());
        }
        let stage = merged.lifecycle_stage();
        self.tracker
            .set_custom_fields(&ticket.key, merged.into_map())
            .provider("set custom fields")?;

        let workflow = workflow_state_for(stage);
        if stage != header.lifecycle_stage() && workflow != ticket.workflow_state {
            debug!("Moving ticket {} to {}", ticket.key, workflow);
            self.tracker
                .set_workflow_state(&ticket.key, workflow)
                .provider("set workflow state")?;
        }
        Ok(())
    }

    fn update_plan_content(&self, id: &PlanId, content: &str) -> Result<()> {
        let (ticket, _) = self.fetch_existing(id)?;
        if ticket.workflow_state.is_closed() {
            return Err(PlanError::lifecycle(id.clone(), "ticket is closed"));
        }
        self.tracker
            .update_description(&ticket.key, content)
            .provider("update description")
    }

    fn add_comment(&self, id: &PlanId, text: &str) -> Result<CommentId> {
        let (ticket, _) = self.fetch_existing(id)?;
        let comment_id = self.tracker.add_comment(&ticket.key, text).provider("add comment")?;
        Ok(CommentId::Key(comment_id))
    }

    fn close_plan(&self, id: &PlanId) -> Result<()> {
        let (ticket, header) = self.fetch_existing(id)?;
        if ticket.workflow_state.is_closed() {
            return Ok(());
        }
        let target = if header.lifecycle_stage().is_final() {
            WorkflowState::Done
        } else {
            WorkflowState::Canceled
        };
        self.tracker
            .set_workflow_state(&ticket.key, target)
            .provider("set workflow state")
    }

    fn add_label(&self, id: &PlanId, label: &str) -> Result<()> {
        let (ticket, _) = self.fetch_existing(id)?;
        self.tracker.add_label(&ticket.key, label).provider("add label")
    }

    fn remove_label(&self, id: &PlanId, label: &str) -> Result<()> {
        let (ticket, _) = self.fetch_existing(id)?;
        self.tracker.remove_label(&ticket.key, label).provider("remove label")
    }

    fn resolve_branch(&self, branch: &str) -> Result<Option<PlanId>> {
        let branch = branch.rsplit_once("refs/heads/").map_or(branch, |(_, b)| b);
        Ok(ticket_branch_re()
            .captures(branch)
            .map(|caps| PlanId::Key(caps[1].to_string())))
    }

    fn closing_reference(&self, id: &PlanId) -> Option<String> {
        id.as_key().map(|key| format!("Fixes {key}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTicketTracker;
    use serde_json::json;

    fn backend() -> (TicketBackend, Arc<MemoryTicketTracker>) {
        let tracker = Arc::new(MemoryTicketTracker::new());
        (TicketBackend::new(tracker.clone(), BackendOptions::default()), tracker)
    }

    #[test]
    fn test_create_stores_header_in_custom_fields() {
        let (backend, tracker) = backend();
        let plan = backend.create_plan(NewPlan::new("Add retries", "1. retry", "u")).unwrap();
        let key = plan.id.as_key().unwrap().to_string();
        assert!(key.starts_with("PLN-"));

        let fields = tracker.get_custom_fields(&key).unwrap().unwrap();
        assert_eq!(fields.get("lifecycle_stage"), Some(&json!("planned")));
        assert_eq!(
            tracker.get_ticket(&key).unwrap().unwrap().workflow_state,
            WorkflowState::Todo
        );
    }

    #[test]
    fn test_stage_change_moves_workflow_state() {
        let (backend, tracker) = backend();
        let plan = backend.create_plan(NewPlan::new("t", "c", "u")).unwrap();
        backend
            .update_metadata(&plan.id, MetadataPatch::new().stage(LifecycleStage::Implementing))
            .unwrap();
        let ticket = tracker.get_ticket(plan.id.as_key().unwrap()).unwrap().unwrap();
        assert_eq!(ticket.workflow_state, WorkflowState::InProgress);
    }

    #[test]
    fn test_metadata_read_skips_description() {
        let (backend, tracker) = backend();
        let plan = backend.create_plan(NewPlan::new("t", "c", "u")).unwrap();
        let before = tracker.call_count("get_ticket");
        assert_eq!(
            backend.get_metadata_field(&plan.id, "created_by").unwrap(),
            FieldLookup::Value(json!("u"))
        );
        assert_eq!(tracker.call_count("get_ticket"), before);
    }

    #[test]
    fn test_close_picks_terminal_state_from_stage() {
        let (backend, tracker) = backend();
        let abandoned = backend.create_plan(NewPlan::new("a", "c", "u")).unwrap();
        backend.close_plan(&abandoned.id).unwrap();
        let ticket = tracker.get_ticket(abandoned.id.as_key().unwrap()).unwrap().unwrap();
        assert_eq!(ticket.workflow_state, WorkflowState::Canceled);

        let done = backend.create_plan(NewPlan::new("b", "c", "u")).unwrap();
        backend
            .update_metadata(&done.id, MetadataPatch::new().stage(LifecycleStage::Implemented))
            .unwrap();
        backend.close_plan(&done.id).unwrap();
        let ticket = tracker.get_ticket(done.id.as_key().unwrap()).unwrap().unwrap();
        assert_eq!(ticket.workflow_state, WorkflowState::Done);
    }

    #[test]
    fn test_resolve_branch() {
        let (backend, _) = backend();
        assert_eq!(
            backend.resolve_branch(&ticket_branch_name("PLN-1a2b3c4d", "Add retries")).unwrap(),
            Some(PlanId::Key("PLN-1a2b3c4d".into()))
        );
        assert_eq!(backend.resolve_branch("P12-x").unwrap(), None);
    }

    #[test]
    fn test_numeric_id_is_mismatch() {
        let (backend, _) = backend();
        assert!(matches!(
            backend.get_plan(&PlanId::Number(3)),
            Err(PlanError::BackendMismatch { .. })
        ));
    }
}

//! Draft pull request backed plans.
//!
//! The plan *is* the change request: header, plan text and checkout footer
//! all live in the PR body (see [`pr_body`](super::pr_body)). A PR cannot
//! close itself, so this backend never produces a closing reference.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use super::pr_body::{render_body, render_footer, render_section, wrap_plan, PrBody};
use super::{
    creation_header, ensure_accepts, merge_update, plan_labels, BackendOptions, CommentId,
    FieldLookup, PlanBackend,
};
use crate::error::{PlanError, ProviderContext, Result};
use crate::metadata::{
    fields, parse_block, render_block, replace_block, HeaderFields, MetadataPatch,
    PLAN_HEADER_SCHEMA,
};
use crate::plan::{NewPlan, Plan, PlanId, PlanQuery, PlanState, Provider};
use crate::store::{Container, ContainerFilter, ContainerKind, ContainerState, ContainerStore, NewContainer};

/// Plan backend over draft pull requests.
pub struct DraftPrBackend {
    store: Arc<dyn ContainerStore>,
    options: BackendOptions,
}

impl DraftPrBackend {
    pub fn new(store: Arc<dyn ContainerStore>, options: BackendOptions) -> Self {
        Self { store, options }
    }

    fn number(&self, id: &PlanId) -> Result<u64> {
        ensure_accepts(Provider::DraftPr, id)?;
        id.as_number()
            .ok_or_else(|| PlanError::mismatch(Provider::DraftPr, format!("id {id}")))
    }

    fn fetch(&self, number: u64) -> Result<Option<(Container, HeaderFields)>> {
        let Some(container) = self.store.get(number).provider("get pull request")? else {
            return Ok(None);
        };
        if container.kind != ContainerKind::PullRequest {
            return Err(PlanError::mismatch(Provider::DraftPr, format!("issue #{number}")));
        }
        Ok(parse_block(&container.body)?.map(|header| (container, header)))
    }

    fn fetch_open(&self, id: &PlanId) -> Result<(u64, Container, HeaderFields)> {
        let number = self.number(id)?;
        let (container, header) = self
            .fetch(number)?
            .ok_or_else(|| PlanError::NotFound { id: id.clone() })?;
        if !container.state.is_open() {
            return Err(PlanError::lifecycle(id.clone(), "pull request is closed"));
        }
        Ok((number, container, header))
    }

    fn to_plan(container: Container, header: HeaderFields) -> Plan {
        let state = match container.state {
            ContainerState::Open => PlanState::Open,
            ContainerState::Closed | ContainerState::Merged => PlanState::Closed,
        };
        let content = PrBody::split(&container.body).plan_content().to_string();
        Plan::assemble(
            Provider::DraftPr,
            PlanId::Number(container.number),
            container.title,
            content,
            header,
        )
        .with_state(state)
        .with_labels(container.labels)
        .with_url(Some(container.url))
    }

    /// Put a summary ahead of the plan text, keeping the plan recoverable.
    pub fn set_summary(&self, id: &PlanId, summary: &str) -> Result<()> {
        let (number, container, _) = self.fetch_open(id)?;
        let parts = PrBody::split(&container.body);
        let section = render_section(Some(summary), parts.plan_content());
        let body = render_body(parts.metadata, &section, parts.footer);
        self.store.update_body(number, &body).provider("update pull request body")
    }

    /// Reuse the open PR already on `branch` instead of opening another.
    ///
    /// The stored header is patched rather than replaced, so fields other
    /// writers set (event comment refs, objective links) survive. A PR on
    /// the branch that carries no plan header is left alone.
    fn update_existing(&self, existing: Container, header: HeaderFields, new: &NewPlan) -> Result<Plan> {
        let number = existing.number;
        let Some(current) = parse_block(&existing.body)? else {
            return Err(PlanError::validation(
                fields::BRANCH_NAME,
                format!("branch already has pull request #{number} that is not a plan"),
            ));
        };
        info!("Branch already has pull request #{}, updating it", number);

        let merged = reuse_patch(&current, &header, new).apply(&current)?;
        let footer = render_footer(number);
        let body = render_body(&render_block(&merged)?, &wrap_plan(&new.content), Some(&footer));
        self.store.update_body(number, &body).provider("update pull request body")?;
        if existing.title != new.title {
            self.store.update_title(number, &new.title).provider("update pull request title")?;
        }
        for label in plan_labels(&self.options, &new.labels) {
            if !existing.labels.contains(&label) {
                self.store.add_label(number, &label).provider("add label")?;
            }
        }

        let id = PlanId::Number(number);
        self.get_plan(&id)?.ok_or(PlanError::NotFound { id })
    }
}

/// Caller metadata for a reused PR, plus immutable fields the stored
/// header is missing. The stage and fields already fixed are not touched.
fn reuse_patch(current: &HeaderFields, header: &HeaderFields, new: &NewPlan) -> MetadataPatch {
    let mut patch = MetadataPatch::new();
    for (name, value) in new.metadata.iter() {
        if name != fields::LIFECYCLE_STAGE && !PLAN_HEADER_SCHEMA.is_immutable(name) {
            patch = patch.set(name, value.clone());
        }
    }
    for def in PLAN_HEADER_SCHEMA.fields.iter().filter(|d| d.is_immutable()) {
        if current.get(def.name).is_none() {
            if let Some(value) = header.get(def.name) {
                patch = patch.set(def.name, value.clone());
            }
        }
    }
    patch
}

impl PlanBackend for DraftPrBackend {
    fn provider(&self) -> Provider {
        Provider::DraftPr
    }

    fn get_plan(&self, id: &PlanId) -> Result<Option<Plan>> {
        let number = self.number(id)?;
        Ok(self
            .fetch(number)?
            .map(|(container, header)| Self::to_plan(container, header)))
    }

    fn list_plans(&self, query: &PlanQuery) -> Result<Vec<Plan>> {
        let filter = ContainerFilter {
            kind: Some(ContainerKind::PullRequest),
            labels: plan_labels(&self.options, &query.labels),
            state: None,
        };
        let mut plans = Vec::new();
        for container in self.store.list(&filter).provider("list pull requests")? {
            match parse_block(&container.body) {
                Ok(Some(header)) => plans.push(Self::to_plan(container, header)),
                Ok(None) => {}
                Err(e) => debug!("Skipping pull request #{}: {}", container.number, e),
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

    fn create_plan(&self, mut new: NewPlan) -> Result<Plan> {
        let branch = new
            .metadata
            .get(fields::BRANCH_NAME)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                PlanError::validation(fields::BRANCH_NAME, "draft pull request plans need a branch")
            })?;
        if new.metadata.remove(fields::CLOSING_REFERENCE).is_some() {
            debug!("Dropped closing_reference: a pull request cannot close itself");
        }
        let header = creation_header(&new, &self.options)?;

        if let Some(existing) = self
            .store
            .find_by_branch(&branch)
            .provider("find pull request")?
            .filter(|c| c.state.is_open())
        {
            return self.update_existing(existing, header, &new);
        }

        let block = render_block(&header)?;
        let section = wrap_plan(&new.content);
        let container = self
            .store
            .create(
                NewContainer::draft_pull_request(
                    &new.title,
                    render_body(&block, &section, None),
                    &branch,
                    &self.options.trunk_branch,
                )
                .with_labels(plan_labels(&self.options, &new.labels)),
            )
            .provider("create pull request")?;

        let number = container.number;
        let body = render_body(&block, &section, Some(&render_footer(number)));
        self.store.update_body(number, &body).provider("add checkout footer")?;
        debug!("Added checkout footer to pull request #{}", number);
        info!("Created plan pull request #{} on '{}'", number, branch);

        Ok(Self::to_plan(Container { body, ..container }, header))
    }

    fn update_metadata(&self, id: &PlanId, patch: MetadataPatch) -> Result<()> {
        if patch.get(fields::CLOSING_REFERENCE).is_some_and(|v| !v.is_null()) {
            return Err(PlanError::validation(
                fields::CLOSING_REFERENCE,
                format!("pull request {id} cannot carry a closing reference"),
            ));
        }
        let number = self.number(id)?;
        let (container, header) = self
            .fetch(number)?
            .ok_or_else(|| PlanError::NotFound { id: id.clone() })?;
        let state = if container.state.is_open() {
            PlanState::Open
        } else {
            PlanState::Closed
        };
        let merged = merge_update(id, state, &header, &patch)?;
        if merged == header {
            return Ok(());
        }
        let body = replace_block(&container.body, &render_block(&merged)?);
        self.store.update_body(number, &body).provider("update pull request body")
    }

    fn update_plan_content(&self, id: &PlanId, content: &str) -> Result<()> {
        let (number, container, _) = self.fetch_open(id)?;
        let parts = PrBody::split(&container.body);
        let section = render_section(parts.summary(), content);
        let body = render_body(parts.metadata, &section, parts.footer);
        self.store.update_body(number, &body).provider("update pull request body")
    }

    fn add_comment(&self, id: &PlanId, text: &str) -> Result<CommentId> {
        let number = self.number(id)?;
        if self.fetch(number)?.is_none() {
            return Err(PlanError::NotFound { id: id.clone() });
        }
        let comment_id = self.store.add_comment(number, text).provider("add comment")?;
        Ok(CommentId::Number(comment_id))
    }

    fn close_plan(&self, id: &PlanId) -> Result<()> {
        let number = self.number(id)?;
        let (container, _) = self
            .fetch(number)?
            .ok_or_else(|| PlanError::NotFound { id: id.clone() })?;
        if !container.state.is_open() {
            return Ok(());
        }
        self.store.close(number).provider("close pull request")
    }

    fn add_label(&self, id: &PlanId, label: &str) -> Result<()> {
        let number = self.number(id)?;
        if self.fetch(number)?.is_none() {
            return Err(PlanError::NotFound { id: id.clone() });
        }
        self.store.add_label(number, label).provider("add label")
    }

    fn remove_label(&self, id: &PlanId, label: &str) -> Result<()> {
        let number = self.number(id)?;
        if self.fetch(number)?.is_none() {
            return Err(PlanError::NotFound { id: id.clone() });
        }
        self.store.remove_label(number, label).provider("remove label")
    }

    fn resolve_branch(&self, branch: &str) -> Result<Option<PlanId>> {
        let found = self.store.find_by_branch(branch).provider("find pull request")?;
        Ok(found
            .filter(|c| parse_block(&c.body).ok().flatten().is_some())
            .map(|c| PlanId::Number(c.number)))
    }

    fn closing_reference(&self, _id: &PlanId) -> Option<String> {
        None
    }
}

//! The backend-agnostic plan interface and its implementations.
//!
//! # Architecture
//!
//! ```text
//! caller ──▶ dyn PlanBackend ──┬──▶ IssueBackend    ──▶ ContainerStore (issues + comments)
//!                              ├──▶ DraftPrBackend  ──▶ ContainerStore (pull requests)
//!                              └──▶ TicketBackend   ──▶ TicketTracker
//! ```
//!
//! Every backend shares the read-merge-write rules in this module; they
//! differ only in where the header and the content physically live.

pub mod draft_pr;
pub mod issue;
pub mod pr_body;
pub mod ticket;

pub use draft_pr::DraftPrBackend;
pub use issue::IssueBackend;
pub use ticket::TicketBackend;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::error::{PlanError, Result};
use crate::metadata::{content_digest, fields, HeaderFields, MetadataPatch};
use crate::plan::{LifecycleStage, NewPlan, Plan, PlanId, PlanQuery, PlanState, Provider};
use crate::store::{ContainerStore, TicketTracker};

/// Identifier of a comment, in whatever shape the provider assigns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommentId {
    Number(u64),
    Key(String),
}

impl CommentId {
    /// Encode for storage in a metadata field.
    pub fn to_value(&self) -> Value {
        match self {
            CommentId::Number(n) => Value::from(*n),
            CommentId::Key(k) => Value::from(k.as_str()),
        }
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommentId::Number(n) => write!(f, "{n}"),
            CommentId::Key(k) => f.write_str(k),
        }
    }
}

/// Result of reading a single header field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldLookup {
    Value(Value),
    /// The plan exists but the field is not set
    Unset,
    PlanNotFound,
}

impl FieldLookup {
    /// The value, if the field is set.
    pub fn value(&self) -> Option<&Value> {
        match self {
            FieldLookup::Value(v) => Some(v),
            _ => None,
        }
    }

    pub(crate) fn from_header(header: &HeaderFields, name: &str) -> Self {
        let name = crate::metadata::schema::current_key(name);
        header
            .get(name)
            .cloned()
            .map_or(FieldLookup::Unset, FieldLookup::Value)
    }
}

/// Settings shared by every backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOptions {
    /// Label carried by every plan container
    pub plan_label: String,
    /// Base branch for draft pull requests
    pub trunk_branch: String,
    /// Recorded as `source_repo` on new plans when set
    pub source_repo: Option<String>,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            plan_label: "planstore-plan".to_string(),
            trunk_branch: "main".to_string(),
            source_repo: None,
        }
    }
}

/// Storage-agnostic plan operations.
///
/// Reads report absence as a value (`Option`, [`FieldLookup`]); writes to
/// a plan that does not exist fail with [`PlanError::NotFound`]. The trait
/// is object safe so callers can hold a `Box<dyn PlanBackend>` chosen from
/// configuration.
pub trait PlanBackend: Send + Sync {
    /// Provider this backend stores plans in.
    fn provider(&self) -> Provider;

    /// Fetch a plan including its content.
    fn get_plan(&self, id: &PlanId) -> Result<Option<Plan>>;

    /// List plans matching `query`, ordered by ascending id.
    ///
    /// `content` is empty on backends that keep it apart from the header;
    /// use [`get_plan`](Self::get_plan) when the body is needed.
    fn list_plans(&self, query: &PlanQuery) -> Result<Vec<Plan>>;

    /// Read one header field without fetching plan content.
    ///
    /// Field names from older schema versions are accepted.
    fn get_metadata_field(&self, id: &PlanId, name: &str) -> Result<FieldLookup>;

    /// Create a plan in the `planned` stage.
    fn create_plan(&self, new: NewPlan) -> Result<Plan>;

    /// Read-merge-write the plan header.
    ///
    /// # Errors
    ///
    /// - [`PlanError::NotFound`] if the plan does not exist
    /// - [`PlanError::Validation`] if the merged header is invalid or an
    ///   immutable field would change
    /// - [`PlanError::Lifecycle`] if the plan is closed or the stage would
    ///   move backwards
    fn update_metadata(&self, id: &PlanId, patch: MetadataPatch) -> Result<()>;

    /// Replace the plan body.
    fn update_plan_content(&self, id: &PlanId, content: &str) -> Result<()>;

    /// Add a comment. Allowed on closed plans.
    fn add_comment(&self, id: &PlanId, text: &str) -> Result<CommentId>;

    /// Post a comment and update metadata as one event.
    ///
    /// The comment is written first so the patch can record its id (see
    /// [`MetadataPatch::with_comment_ref`]). The patch is checked before
    /// anything is written.
    fn post_event(
        &self,
        id: &PlanId,
        comment: Option<&str>,
        patch: Option<MetadataPatch>,
    ) -> Result<Option<CommentId>> {
        if let Some(patch) = &patch {
            patch.check_fields()?;
            if comment.is_none() {
                if let Some(field) = patch.comment_ref_field() {
                    return Err(PlanError::validation(
                        field,
                        "comment reference requested without a comment",
                    ));
                }
            }
        }

        let comment_id = match comment {
            Some(text) => Some(self.add_comment(id, text)?),
            None => None,
        };

        if let Some(mut patch) = patch {
            if let Some(cid) = &comment_id {
                patch.resolve_comment_ref(cid.to_value());
            }
            self.update_metadata(id, patch)?;
        }
        Ok(comment_id)
    }

    /// Close a plan. Closing a closed plan is a no-op.
    fn close_plan(&self, id: &PlanId) -> Result<()>;

    fn add_label(&self, id: &PlanId, label: &str) -> Result<()>;

    fn remove_label(&self, id: &PlanId, label: &str) -> Result<()>;

    /// Map a working branch back to the plan it implements.
    fn resolve_branch(&self, branch: &str) -> Result<Option<PlanId>>;

    /// Text that closes the plan when a change referencing it lands.
    ///
    /// `None` where the plan container itself is what lands.
    fn closing_reference(&self, id: &PlanId) -> Option<String>;
}

// ============================================================================
// Shared rules
// ============================================================================

/// Reject ids of the wrong shape for `provider`.
pub(crate) fn ensure_accepts(provider: Provider, id: &PlanId) -> Result<()> {
    if provider.accepts(id) {
        Ok(())
    } else {
        Err(PlanError::mismatch(provider, format!("id {id}")))
    }
}

/// Build the header for a plan being created.
///
/// Creation may set any field, immutable ones included, but the plan
/// always starts `planned`.
pub(crate) fn creation_header(new: &NewPlan, options: &BackendOptions) -> Result<HeaderFields> {
    if let Some(stage) = new.metadata.target_stage() {
        if stage != LifecycleStage::Planned {
            return Err(PlanError::validation(
                fields::LIFECYCLE_STAGE,
                format!("plans are created as planned, not {stage}"),
            ));
        }
    }
    if new.title.trim().is_empty() {
        return Err(PlanError::validation("title", "must not be empty"));
    }
    if let Some(field) = new.metadata.comment_ref_field() {
        return Err(PlanError::validation(field, "no comment is posted at creation"));
    }

    let mut header = HeaderFields::for_creation(&new.created_by, Utc::now());
    header.set(fields::CONTENT_DIGEST, Value::from(content_digest(&new.content)));
    if let Some(repo) = &options.source_repo {
        header.set(fields::SOURCE_REPO, Value::from(repo.as_str()));
    }
    for (name, value) in new.metadata.iter() {
        if value.is_null() {
            header.remove(name);
        } else {
            header.set(name, value.clone());
        }
    }
    header.validate()?;
    Ok(header)
}

/// Apply `patch` to the stored header of an existing plan.
///
/// Enforces the closed-plan and forward-only stage rules before the
/// schema rules in [`MetadataPatch::apply`].
pub(crate) fn merge_update(
    id: &PlanId,
    state: PlanState,
    current: &HeaderFields,
    patch: &MetadataPatch,
) -> Result<HeaderFields> {
    if state.is_terminal() {
        return Err(PlanError::lifecycle(id.clone(), "plan is closed"));
    }
    if let Some(target) = patch.target_stage() {
        let stage = current.lifecycle_stage();
        if !stage.can_transition_to(target) {
            return Err(PlanError::lifecycle(
                id.clone(),
                format!("cannot move from {stage} back to {target}"),
            ));
        }
    }
    patch.apply(current)
}

/// Labels for a new plan container: the plan label first, then extras.
pub(crate) fn plan_labels(options: &BackendOptions, extra: &[String]) -> Vec<String> {
    let mut labels = vec![options.plan_label.clone()];
    for label in extra {
        if !labels.contains(label) {
            labels.push(label.clone());
        }
    }
    labels
}

// ============================================================================
// Factory
// ============================================================================

/// Storage collaborators a backend can be built on.
#[derive(Clone)]
pub struct StoreClients {
    pub containers: Arc<dyn ContainerStore>,
    pub tickets: Arc<dyn TicketTracker>,
}

/// Build the backend for `provider`.
pub fn load_backend(
    provider: Provider,
    config: &StoreConfig,
    clients: &StoreClients,
) -> Box<dyn PlanBackend> {
    let options = config.backend_options();
    match provider {
        Provider::Issues => Box::new(IssueBackend::new(clients.containers.clone(), options)),
        Provider::DraftPr => Box::new(DraftPrBackend::new(clients.containers.clone(), options)),
        Provider::Tickets => Box::new(TicketBackend::new(clients.tickets.clone(), options)),
    }
}

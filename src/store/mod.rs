//! Lower-level storage collaborators the plan backends are built on.
//!
//! These traits abstract the tracker a backend talks to, so backends can be
//! exercised against an in-process store instead of a live service.
//!
//! - [`ContainerStore`] - issues and pull requests with comments and labels
//! - [`TicketTracker`] - a ticket system with workflow states and custom fields
//!
//! Both return `anyhow::Result`: failures here are provider failures, and
//! the backends classify them with
//! [`ProviderContext`](crate::error::ProviderContext).

pub mod memory;

pub use memory::{MemoryContainerStore, MemoryTicketTracker};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ============================================================================
// Containers
// ============================================================================

/// Whether a container is an issue or a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    Issue,
    PullRequest,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::Issue => write!(f, "issue"),
            ContainerKind::PullRequest => write!(f, "pull request"),
        }
    }
}

/// Open/closed state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    #[default]
    Open,
    Closed,
    /// Pull requests only
    Merged,
}

impl ContainerState {
    pub fn is_open(&self) -> bool {
        matches!(self, ContainerState::Open)
    }
}

/// An issue or pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub number: u64,
    pub kind: ContainerKind,
    pub title: String,
    pub body: String,
    pub labels: BTreeSet<String>,
    pub state: ContainerState,
    /// Source branch of a pull request
    pub head_branch: Option<String>,
    /// Target branch of a pull request
    pub base_branch: Option<String>,
    pub draft: bool,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub url: String,
}

/// Input for [`ContainerStore::create`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewContainer {
    pub kind: ContainerKind,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub head_branch: Option<String>,
    pub base_branch: Option<String>,
    pub draft: bool,
}

impl NewContainer {
    pub fn issue(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind: ContainerKind::Issue,
            title: title.into(),
            body: body.into(),
            labels: Vec::new(),
            head_branch: None,
            base_branch: None,
            draft: false,
        }
    }

    pub fn draft_pull_request(
        title: impl Into<String>,
        body: impl Into<String>,
        head: impl Into<String>,
        base: impl Into<String>,
    ) -> Self {
        Self {
            kind: ContainerKind::PullRequest,
            title: title.into(),
            body: body.into(),
            labels: Vec::new(),
            head_branch: Some(head.into()),
            base_branch: Some(base.into()),
            draft: true,
        }
    }

    #[must_use]
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }
}

/// A comment on a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub container: u64,
    pub body: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

/// Criteria for [`ContainerStore::list`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerFilter {
    pub kind: Option<ContainerKind>,
    /// Labels a container must carry
    pub labels: Vec<String>,
    /// `None` lists every state
    pub state: Option<ContainerState>,
}

/// An issue/pull request tracker.
///
/// Comments are fetched separately from containers, so reading a body never
/// pays for reading its comments.
pub trait ContainerStore: Send + Sync {
    /// Create an issue or pull request.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the request.
    fn create(&self, new: NewContainer) -> Result<Container>;

    /// Fetch a container by number. `Ok(None)` if it does not exist.
    fn get(&self, number: u64) -> Result<Option<Container>>;

    /// Fetch the most recent pull request whose head is `branch`.
    fn find_by_branch(&self, branch: &str) -> Result<Option<Container>>;

    fn update_body(&self, number: u64, body: &str) -> Result<()>;

    fn update_title(&self, number: u64, title: &str) -> Result<()>;

    /// Add a comment and return its id.
    fn add_comment(&self, number: u64, body: &str) -> Result<u64>;

    fn get_comment(&self, comment_id: u64) -> Result<Option<Comment>>;

    fn update_comment(&self, comment_id: u64, body: &str) -> Result<()>;

    /// List comments in creation order.
    fn list_comments(&self, number: u64) -> Result<Vec<Comment>>;

    fn add_label(&self, number: u64, label: &str) -> Result<()>;

    fn remove_label(&self, number: u64, label: &str) -> Result<()>;

    fn close(&self, number: u64) -> Result<()>;

    /// List containers matching `filter`, ordered by number.
    fn list(&self, filter: &ContainerFilter) -> Result<Vec<Container>>;
}

// ============================================================================
// Tickets
// ============================================================================

/// Workflow state of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WorkflowState {
    Backlog,
    #[default]
    Todo,
    InProgress,
    InReview,
    Done,
    Canceled,
}

impl WorkflowState {
    pub fn is_closed(&self) -> bool {
        matches!(self, WorkflowState::Done | WorkflowState::Canceled)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowState::Backlog => "Backlog",
            WorkflowState::Todo => "Todo",
            WorkflowState::InProgress => "In Progress",
            WorkflowState::InReview => "In Review",
            WorkflowState::Done => "Done",
            WorkflowState::Canceled => "Canceled",
        };
        f.write_str(name)
    }
}

/// A ticket in a third-party tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub key: String,
    pub title: String,
    pub description: String,
    pub workflow_state: WorkflowState,
    pub custom_fields: BTreeMap<String, Value>,
    pub labels: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub url: String,
}

/// Input for [`TicketTracker::create_ticket`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTicket {
    pub title: String,
    pub description: String,
    pub workflow_state: WorkflowState,
    pub custom_fields: BTreeMap<String, Value>,
    pub labels: Vec<String>,
}

/// A ticket system storing metadata in custom fields.
pub trait TicketTracker: Send + Sync {
    fn create_ticket(&self, new: NewTicket) -> Result<Ticket>;

    /// Fetch a ticket by key. `Ok(None)` if it does not exist.
    fn get_ticket(&self, key: &str) -> Result<Option<Ticket>>;

    /// Fetch only the custom fields of a ticket.
    fn get_custom_fields(&self, key: &str) -> Result<Option<BTreeMap<String, Value>>>;

    fn update_description(&self, key: &str, description: &str) -> Result<()>;

    /// Replace the custom fields of a ticket.
    fn set_custom_fields(&self, key: &str, fields: BTreeMap<String, Value>) -> Result<()>;

    fn set_workflow_state(&self, key: &str, state: WorkflowState) -> Result<()>;

    /// Add a comment and return its opaque id.
    fn add_comment(&self, key: &str, body: &str) -> Result<String>;

    fn add_label(&self, key: &str, label: &str) -> Result<()>;

    fn remove_label(&self, key: &str, label: &str) -> Result<()>;

    /// List tickets carrying every label in `labels`, ordered by key.
    fn list_tickets(&self, labels: &[String]) -> Result<Vec<Ticket>>;
}

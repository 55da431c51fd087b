//! In-process implementations of the storage collaborators.
//!
//! Both stores keep their state behind a `Mutex` and can be persisted to a
//! JSON file, which is how the CLI works offline. Tests use them as faked
//! lower-level collaborators underneath the real backends; every trait
//! call is counted so tests can assert which provider paths were taken.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    Comment, Container, ContainerFilter, ContainerKind, ContainerState, ContainerStore,
    NewContainer, NewTicket, Ticket, TicketTracker, WorkflowState,
};
use crate::persist;

/// First comment id handed out by a fresh store.
const FIRST_COMMENT_ID: u64 = 1_000_001;

fn lock<T>(mutex: &Mutex<T>) -> Result<std::sync::MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| anyhow!("store state lock poisoned"))
}

/// Per-operation call counters.
#[derive(Debug, Default)]
struct CallLog(Mutex<BTreeMap<&'static str, usize>>);

impl CallLog {
    fn record(&self, op: &'static str) {
        if let Ok(mut calls) = self.0.lock() {
            *calls.entry(op).or_default() += 1;
        }
    }

    fn count(&self, op: &str) -> usize {
        self.0
            .lock()
            .map(|calls| calls.get(op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn reset(&self) {
        if let Ok(mut calls) = self.0.lock() {
            calls.clear();
        }
    }
}

// ============================================================================
// Container store
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContainerData {
    repo_url: String,
    author: String,
    next_number: u64,
    next_comment_id: u64,
    containers: BTreeMap<u64, Container>,
    comments: BTreeMap<u64, Comment>,
    /// Bodies exactly as submitted to `create`, by container number
    #[serde(default)]
    created_bodies: BTreeMap<u64, String>,
}

impl Default for ContainerData {
    fn default() -> Self {
        Self {
            repo_url: "https://github.com/local/repo".to_string(),
            author: "local".to_string(),
            next_number: 1,
            next_comment_id: FIRST_COMMENT_ID,
            containers: BTreeMap::new(),
            comments: BTreeMap::new(),
            created_bodies: BTreeMap::new(),
        }
    }
}

/// Issue and pull request store held in memory.
///
/// # Example
///
/// ```
/// use planstore::store::{ContainerStore, MemoryContainerStore, NewContainer};
///
/// let store = MemoryContainerStore::new();
/// let issue = store.create(NewContainer::issue("Title", "Body")).unwrap();
/// assert_eq!(issue.number, 1);
/// assert_eq!(store.call_count("create"), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryContainerStore {
    data: Mutex<ContainerData>,
    calls: CallLog,
}

impl MemoryContainerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the author recorded on new containers and comments.
    #[must_use]
    pub fn with_author(self, author: &str) -> Self {
        if let Ok(mut data) = self.data.lock() {
            data.author = author.to_string();
        }
        self
    }

    /// Set the repository URL used to build container URLs.
    #[must_use]
    pub fn with_repo_url(self, url: &str) -> Self {
        if let Ok(mut data) = self.data.lock() {
            data.repo_url = url.trim_end_matches('/').to_string();
        }
        self
    }

    /// Load a store persisted with [`save`](Self::save), or start empty.
    pub fn load(path: &Path) -> Result<Self> {
        let data = persist::load_json(path)?.unwrap_or_default();
        Ok(Self {
            data: Mutex::new(data),
            calls: CallLog::default(),
        })
    }

    /// Persist the store atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = lock(&self.data)?.clone();
        persist::save_json(path, &data)
    }

    /// Number of times a trait operation was called, by method name.
    pub fn call_count(&self, op: &str) -> usize {
        self.calls.count(op)
    }

    pub fn reset_calls(&self) {
        self.calls.reset();
    }

    /// Body exactly as it was passed to `create`.
    pub fn created_body(&self, number: u64) -> Option<String> {
        lock(&self.data).ok()?.created_bodies.get(&number).cloned()
    }

    /// Number of containers ever created.
    pub fn container_count(&self) -> usize {
        lock(&self.data).map(|d| d.containers.len()).unwrap_or(0)
    }

    /// Overwrite a container body without touching the call log.
    ///
    /// Used to seed legacy layouts in tests and migrations.
    pub fn seed_body(&self, number: u64, body: &str) -> Result<()> {
        let mut data = lock(&self.data)?;
        let container = data
            .containers
            .get_mut(&number)
            .ok_or_else(|| anyhow!("no container #{number}"))?;
        container.body = body.to_string();
        Ok(())
    }

    /// Add a comment written by `author` without touching the call log.
    pub fn seed_comment(&self, number: u64, author: &str, body: &str) -> Result<u64> {
        let mut data = lock(&self.data)?;
        container_mut(&mut data, number)?;
        let id = data.next_comment_id;
        data.next_comment_id += 1;
        data.comments.insert(
            id,
            Comment {
                id,
                container: number,
                body: body.to_string(),
                author: author.to_string(),
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    /// Mark a pull request as merged.
    pub fn merge(&self, number: u64) -> Result<()> {
        let mut data = lock(&self.data)?;
        let container = data
            .containers
            .get_mut(&number)
            .ok_or_else(|| anyhow!("no container #{number}"))?;
        if container.kind != ContainerKind::PullRequest {
            bail!("#{number} is not a pull request");
        }
        container.state = ContainerState::Merged;
        Ok(())
    }
}

fn container_mut(data: &mut ContainerData, number: u64) -> Result<&mut Container> {
    data.containers
        .get_mut(&number)
        .ok_or_else(|| anyhow!("container #{number} not found"))
}

impl ContainerStore for MemoryContainerStore {
    fn create(&self, new: NewContainer) -> Result<Container> {
        self.calls.record("create");
        if new.kind == ContainerKind::PullRequest && new.head_branch.is_none() {
            bail!("pull request requires a head branch");
        }
        let mut data = lock(&self.data)?;
        let number = data.next_number;
        data.next_number += 1;
        let segment = match new.kind {
            ContainerKind::Issue => "issues",
            ContainerKind::PullRequest => "pull",
        };
        let container = Container {
            number,
            kind: new.kind,
            title: new.title,
            body: new.body.clone(),
            labels: new.labels.into_iter().collect(),
            state: ContainerState::Open,
            head_branch: new.head_branch,
            base_branch: new.base_branch,
            draft: new.draft,
            author: data.author.clone(),
            created_at: Utc::now(),
            url: format!("{}/{}/{}", data.repo_url, segment, number),
        };
        data.created_bodies.insert(number, new.body);
        data.containers.insert(number, container.clone());
        Ok(container)
    }

    fn get(&self, number: u64) -> Result<Option<Container>> {
        self.calls.record("get");
        Ok(lock(&self.data)?.containers.get(&number).cloned())
    }

    fn find_by_branch(&self, branch: &str) -> Result<Option<Container>> {
        self.calls.record("find_by_branch");
        Ok(lock(&self.data)?
            .containers
            .values()
            .rev()
            .find(|c| c.kind == ContainerKind::PullRequest && c.head_branch.as_deref() == Some(branch))
            .cloned())
    }

    fn update_body(&self, number: u64, body: &str) -> Result<()> {
        self.calls.record("update_body");
        let mut data = lock(&self.data)?;
        container_mut(&mut data, number)?.body = body.to_string();
        Ok(())
    }

    fn update_title(&self, number: u64, title: &str) -> Result<()> {
        self.calls.record("update_title");
        let mut data = lock(&self.data)?;
        container_mut(&mut data, number)?.title = title.to_string();
        Ok(())
    }

    fn add_comment(&self, number: u64, body: &str) -> Result<u64> {
        self.calls.record("add_comment");
        let mut data = lock(&self.data)?;
        container_mut(&mut data, number)?;
        let id = data.next_comment_id;
        data.next_comment_id += 1;
        let comment = Comment {
            id,
            container: number,
            body: body.to_string(),
            author: data.author.clone(),
            created_at: Utc::now(),
        };
        data.comments.insert(id, comment);
        Ok(id)
    }

    fn get_comment(&self, comment_id: u64) -> Result<Option<Comment>> {
        self.calls.record("get_comment");
        Ok(lock(&self.data)?.comments.get(&comment_id).cloned())
    }

    fn update_comment(&self, comment_id: u64, body: &str) -> Result<()> {
        self.calls.record("update_comment");
        let mut data = lock(&self.data)?;
        let comment = data
            .comments
            .get_mut(&comment_id)
            .ok_or_else(|| anyhow!("comment {comment_id} not found"))?;
        comment.body = body.to_string();
        Ok(())
    }

    fn list_comments(&self, number: u64) -> Result<Vec<Comment>> {
        self.calls.record("list_comments");
        Ok(lock(&self.data)?
            .comments
            .values()
            .filter(|c| c.container == number)
            .cloned()
            .collect())
    }

    fn add_label(&self, number: u64, label: &str) -> Result<()> {
        self.calls.record("add_label");
        let mut data = lock(&self.data)?;
        container_mut(&mut data, number)?
            .labels
            .insert(label.to_string());
        Ok(())
    }

    fn remove_label(&self, number: u64, label: &str) -> Result<()> {
        self.calls.record("remove_label");
        let mut data = lock(&self.data)?;
        container_mut(&mut data, number)?.labels.remove(label);
        Ok(())
    }

    fn close(&self, number: u64) -> Result<()> {
        self.calls.record("close");
        let mut data = lock(&self.data)?;
        let container = container_mut(&mut data, number)?;
        if container.state == ContainerState::Open {
            container.state = ContainerState::Closed;
        }
        Ok(())
    }

    fn list(&self, filter: &ContainerFilter) -> Result<Vec<Container>> {
        self.calls.record("list");
        Ok(lock(&self.data)?
            .containers
            .values()
            .filter(|c| filter.kind.is_none_or(|k| k == c.kind))
            .filter(|c| filter.state.is_none_or(|s| s == c.state))
            .filter(|c| filter.labels.iter().all(|l| c.labels.contains(l)))
            .cloned()
            .collect())
    }
}

// ============================================================================
// Ticket tracker
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TicketData {
    prefix: String,
    base_url: String,
    tickets: BTreeMap<String, Ticket>,
    comments: BTreeMap<String, Vec<(String, String)>>,
}

impl Default for TicketData {
    fn default() -> Self {
        Self {
            prefix: "PLN".to_string(),
            base_url: "https://tickets.local/browse".to_string(),
            tickets: BTreeMap::new(),
            comments: BTreeMap::new(),
        }
    }
}

/// Ticket tracker held in memory.
///
/// Keys look like `PLN-1a2b3c4d`: a prefix and an opaque random suffix.
#[derive(Debug, Default)]
pub struct MemoryTicketTracker {
    data: Mutex<TicketData>,
    calls: CallLog,
}

impl MemoryTicketTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the key prefix for new tickets.
    #[must_use]
    pub fn with_prefix(self, prefix: &str) -> Self {
        if let Ok(mut data) = self.data.lock() {
            data.prefix = prefix.to_string();
        }
        self
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = persist::load_json(path)?.unwrap_or_default();
        Ok(Self {
            data: Mutex::new(data),
            calls: CallLog::default(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = lock(&self.data)?.clone();
        persist::save_json(path, &data)
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.calls.count(op)
    }

    /// Comment bodies on a ticket, oldest first.
    pub fn comments(&self, key: &str) -> Vec<String> {
        lock(&self.data)
            .map(|d| {
                d.comments
                    .get(key)
                    .map(|cs| cs.iter().map(|(_, body)| body.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

fn ticket_mut<'a>(data: &'a mut TicketData, key: &str) -> Result<&'a mut Ticket> {
    data.tickets
        .get_mut(key)
        .ok_or_else(|| anyhow!("ticket {key} not found"))
}

impl TicketTracker for MemoryTicketTracker {
    fn create_ticket(&self, new: NewTicket) -> Result<Ticket> {
        self.calls.record("create_ticket");
        let mut data = lock(&self.data)?;
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let key = format!("{}-{}", data.prefix, &suffix[..8]);
        let ticket = Ticket {
            url: format!("{}/{}", data.base_url, key),
            key: key.clone(),
            title: new.title,
            description: new.description,
            workflow_state: new.workflow_state,
            custom_fields: new.custom_fields,
            labels: new.labels.into_iter().collect(),
            created_at: Utc::now(),
        };
        data.tickets.insert(key, ticket.clone());
        Ok(ticket)
    }

    fn get_ticket(&self, key: &str) -> Result<Option<Ticket>> {
        self.calls.record("get_ticket");
        Ok(lock(&self.data)?.tickets.get(key).cloned())
    }

    fn get_custom_fields(&self, key: &str) -> Result<Option<BTreeMap<String, Value>>> {
        self.calls.record("get_custom_fields");
        Ok(lock(&self.data)?
            .tickets
            .get(key)
            .map(|t| t.custom_fields.clone()))
    }

    fn update_description(&self, key: &str, description: &str) -> Result<()> {
        self.calls.record("update_description");
        let mut data = lock(&self.data)?;
        ticket_mut(&mut data, key)?.description = description.to_string();
        Ok(())
    }

    fn set_custom_fields(&self, key: &str, fields: BTreeMap<String, Value>) -> Result<()> {
        self.calls.record("set_custom_fields");
        let mut data = lock(&self.data)?;
        ticket_mut(&mut data, key)?.custom_fields = fields;
        Ok(())
    }

    fn set_workflow_state(&self, key: &str, state: WorkflowState) -> Result<()> {
        self.calls.record("set_workflow_state");
        let mut data = lock(&self.data)?;
        ticket_mut(&mut data, key)?.workflow_state = state;
        Ok(())
    }

    fn add_comment(&self, key: &str, body: &str) -> Result<String> {
        self.calls.record("add_comment");
        let mut data = lock(&self.data)?;
        ticket_mut(&mut data, key)?;
        let comments = data.comments.entry(key.to_string()).or_default();
        let id = format!("{key}/c{}", comments.len() + 1);
        comments.push((id.clone(), body.to_string()));
        Ok(id)
    }

    fn add_label(&self, key: &str, label: &str) -> Result<()> {
        self.calls.record("add_label");
        let mut data = lock(&self.data)?;
        ticket_mut(&mut data, key)?.labels.insert(label.to_string());
        Ok(())
    }

    fn remove_label(&self, key: &str, label: &str) -> Result<()> {
        self.calls.record("remove_label");
        let mut data = lock(&self.data)?;
        ticket_mut(&mut data, key)?.labels.remove(label);
        Ok(())
    }

    fn list_tickets(&self, labels: &[String]) -> Result<Vec<Ticket>> {
        self.calls.record("list_tickets");
        Ok(lock(&self.data)?
            .tickets
            .values()
            .filter(|t| labels.iter().all(|l| t.labels.contains(l)))
            .cloned()
            .collect())
    }
}

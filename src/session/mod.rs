//! Session-scoped markers.
//!
//! A marker records that something happened during one working session,
//! keyed by `(session_id, name)`. Markers are best-effort dedup, not a
//! distributed lock.
//!
//! # Kinds
//!
//! - [`MarkerKind::Reusable`] - a durable fact; reading leaves it in place
//! - [`MarkerKind::OneTime`] - a single decision; the first read deletes it
//!
//! The kind is a field on the marker, not a separate storage mechanism.
//! Stores are passed into operations explicitly; there is no ambient
//! session state.

pub mod persistence;

pub use persistence::FileMarkerStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{PlanError, Result};

/// How a marker behaves when read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    /// Persists once written
    Reusable,
    /// Deleted by the first read
    OneTime,
}

/// A single session marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub session_id: String,
    pub name: String,
    pub kind: MarkerKind,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

impl Marker {
    pub fn new(session_id: &str, name: &str, kind: MarkerKind, value: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            name: name.to_string(),
            kind,
            value: value.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Key/value store of markers scoped by session.
pub trait MarkerStore {
    /// Write or overwrite a marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the session id is unusable or storage fails.
    fn put(&self, session_id: &str, name: &str, kind: MarkerKind, value: &str) -> Result<()>;

    /// Read a marker. One-time markers are deleted by this call.
    fn read(&self, session_id: &str, name: &str) -> Result<Option<Marker>>;

    /// Delete a marker if present.
    fn delete(&self, session_id: &str, name: &str) -> Result<()>;

    /// Names of all markers in a session, without consuming any.
    fn list(&self, session_id: &str) -> Result<Vec<String>>;

    /// Delete every marker of a session.
    fn clear_session(&self, session_id: &str) -> Result<()>;
}

/// Generate a fresh session id.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Reject session ids that cannot safely key storage.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    let ok = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !session_id.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(PlanError::validation(
            "session_id",
            format!("'{session_id}' must be 1-128 characters of [A-Za-z0-9._-] not starting with '.'"),
        ))
    }
}

/// Apply read semantics to a session's marker map.
fn read_from(markers: &mut BTreeMap<String, Marker>, name: &str) -> Option<Marker> {
    match markers.get(name)?.kind {
        MarkerKind::Reusable => markers.get(name).cloned(),
        MarkerKind::OneTime => markers.remove(name),
    }
}

/// Marker store held in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct InMemoryMarkerStore {
    sessions: Mutex<BTreeMap<String, BTreeMap<String, Marker>>>,
}

impl InMemoryMarkerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, BTreeMap<String, Marker>>>> {
        self.sessions
            .lock()
            .map_err(|_| PlanError::Other(anyhow::anyhow!("marker store lock poisoned")))
    }
}

impl MarkerStore for InMemoryMarkerStore {
    fn put(&self, session_id: &str, name: &str, kind: MarkerKind, value: &str) -> Result<()> {
        validate_session_id(session_id)?;
        self.sessions()?
            .entry(session_id.to_string())
            .or_default()
            .insert(name.to_string(), Marker::new(session_id, name, kind, value));
        Ok(())
    }

    fn read(&self, session_id: &str, name: &str) -> Result<Option<Marker>> {
        let mut sessions = self.sessions()?;
        Ok(sessions
            .get_mut(session_id)
            .and_then(|markers| read_from(markers, name)))
    }

    fn delete(&self, session_id: &str, name: &str) -> Result<()> {
        if let Some(markers) = self.sessions()?.get_mut(session_id) {
            markers.remove(name);
        }
        Ok(())
    }

    fn list(&self, session_id: &str) -> Result<Vec<String>> {
        Ok(self
            .sessions()?
            .get(session_id)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn clear_session(&self, session_id: &str) -> Result<()> {
        self.sessions()?.remove(session_id);
        Ok(())
    }
}

//! Versioned field definitions for the `plan-header` metadata block.
//!
//! Reading is permissive and writing is strict. The reader consults
//! [`KEY_MIGRATIONS`] to accept keys from every supported prior version;
//! validation and rendering only know the current version's names.

use chrono::DateTime;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{PlanError, Result};
use crate::plan::LifecycleStage;

/// Name of the metadata block carrying plan headers.
pub const PLAN_HEADER: &str = "plan-header";

/// Version written by this crate.
pub const CURRENT_SCHEMA_VERSION: u64 = 2;

/// Oldest version the reader still accepts.
pub const MIN_SUPPORTED_SCHEMA_VERSION: u64 = 1;

/// Field names of the current schema.
pub mod fields {
    pub const SCHEMA_VERSION: &str = "schema_version";
    pub const CREATED_AT: &str = "created_at";
    pub const CREATED_BY: &str = "created_by";
    pub const CONTENT_DIGEST: &str = "content_digest";
    pub const LIFECYCLE_STAGE: &str = "lifecycle_stage";
    pub const BRANCH_NAME: &str = "branch_name";
    pub const PLAN_COMMENT_ID: &str = "plan_comment_id";
    pub const OBJECTIVE_ID: &str = "objective_id";
    pub const CREATED_FROM_SESSION: &str = "created_from_session";
    pub const SOURCE_REPO: &str = "source_repo";
    pub const CLOSING_REFERENCE: &str = "closing_reference";
    pub const CONSOLIDATED_FROM: &str = "consolidated_from";
    pub const SUPERSEDED_BY: &str = "superseded_by";
    pub const LAST_EVENT_COMMENT_ID: &str = "last_event_comment_id";
    pub const LAST_LOCAL_IMPL_AT: &str = "last_local_impl_at";
    pub const LAST_LOCAL_IMPL_SESSION: &str = "last_local_impl_session";
    pub const LAST_REMOTE_IMPL_AT: &str = "last_remote_impl_at";
}

// ============================================================================
// Field definitions
// ============================================================================

/// Value type of a metadata field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Non-empty string
    Text,
    /// Non-negative integer
    Integer,
    /// RFC 3339 timestamp string
    Timestamp,
    /// One of the lifecycle stage names
    Stage,
    /// Plan or comment identifier: integer or non-empty string
    Identifier,
    /// Array of identifiers
    IdentifierList,
}

impl FieldKind {
    /// Check a value against this kind, describing the mismatch on failure.
    pub fn check(&self, value: &Value) -> std::result::Result<(), String> {
        let ok = match self {
            FieldKind::Text => value.as_str().is_some_and(|s| !s.is_empty()),
            FieldKind::Integer => value.as_u64().is_some(),
            FieldKind::Timestamp => value
                .as_str()
                .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok()),
            FieldKind::Stage => value
                .as_str()
                .is_some_and(|s| s.parse::<LifecycleStage>().is_ok()),
            FieldKind::Identifier => is_identifier(value),
            FieldKind::IdentifierList => value
                .as_array()
                .is_some_and(|items| items.iter().all(is_identifier)),
        };
        if ok {
            Ok(())
        } else {
            Err(format!("expected {self}, got {value}"))
        }
    }
}

fn is_identifier(value: &Value) -> bool {
    value.as_u64().is_some() || value.as_str().is_some_and(|s| !s.is_empty())
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Text => "text",
            FieldKind::Integer => "integer",
            FieldKind::Timestamp => "RFC 3339 timestamp",
            FieldKind::Stage => "lifecycle stage",
            FieldKind::Identifier => "identifier",
            FieldKind::IdentifierList => "identifier list",
        };
        f.write_str(name)
    }
}

/// Whether a field may change after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mutability {
    /// Fixed at creation
    Immutable,
    #[default]
    Mutable,
}

/// A single field of a schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    pub mutability: Mutability,
    pub required: bool,
}

impl FieldDef {
    const fn immutable(name: &'static str, kind: FieldKind, required: bool) -> Self {
        Self {
            name,
            kind,
            mutability: Mutability::Immutable,
            required,
        }
    }

    const fn mutable(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            mutability: Mutability::Mutable,
            required: false,
        }
    }

    #[must_use]
    pub fn is_immutable(&self) -> bool {
        self.mutability == Mutability::Immutable
    }
}

/// A named, versioned set of field definitions.
#[derive(Debug, Clone, Copy)]
pub struct MetadataSchema {
    pub name: &'static str,
    pub version: u64,
    pub fields: &'static [FieldDef],
}

/// Fields of `plan-header` version 2.
pub const PLAN_HEADER_FIELDS: &[FieldDef] = &[
    FieldDef::immutable(fields::SCHEMA_VERSION, FieldKind::Integer, true),
    FieldDef::immutable(fields::CREATED_AT, FieldKind::Timestamp, true),
    FieldDef::immutable(fields::CREATED_BY, FieldKind::Text, true),
    // Digest of the content the plan was created with. Content rewrites
    // leave it as is, so it identifies the original submission only.
    FieldDef::immutable(fields::CONTENT_DIGEST, FieldKind::Text, false),
    FieldDef {
        name: fields::LIFECYCLE_STAGE,
        kind: FieldKind::Stage,
        mutability: Mutability::Mutable,
        required: true,
    },
    FieldDef::mutable(fields::BRANCH_NAME, FieldKind::Text),
    FieldDef::mutable(fields::PLAN_COMMENT_ID, FieldKind::Identifier),
    FieldDef::mutable(fields::OBJECTIVE_ID, FieldKind::Identifier),
    FieldDef::mutable(fields::CREATED_FROM_SESSION, FieldKind::Text),
    FieldDef::mutable(fields::SOURCE_REPO, FieldKind::Text),
    FieldDef::mutable(fields::CLOSING_REFERENCE, FieldKind::Identifier),
    FieldDef::mutable(fields::CONSOLIDATED_FROM, FieldKind::IdentifierList),
    FieldDef::mutable(fields::SUPERSEDED_BY, FieldKind::Identifier),
    FieldDef::mutable(fields::LAST_EVENT_COMMENT_ID, FieldKind::Identifier),
    FieldDef::mutable(fields::LAST_LOCAL_IMPL_AT, FieldKind::Timestamp),
    FieldDef::mutable(fields::LAST_LOCAL_IMPL_SESSION, FieldKind::Text),
    FieldDef::mutable(fields::LAST_REMOTE_IMPL_AT, FieldKind::Timestamp),
];

/// The schema every write is validated against.
pub const PLAN_HEADER_SCHEMA: MetadataSchema = MetadataSchema {
    name: PLAN_HEADER,
    version: CURRENT_SCHEMA_VERSION,
    fields: PLAN_HEADER_FIELDS,
};

// ============================================================================
// Migrations
// ============================================================================

/// A key renamed between schema versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMigration {
    pub old: &'static str,
    pub new: &'static str,
    /// First version that writes `new`
    pub since_version: u64,
}

/// Renames consulted by the reader only.
pub const KEY_MIGRATIONS: &[KeyMigration] = &[
    KeyMigration {
        old: "objective_issue",
        new: fields::OBJECTIVE_ID,
        since_version: 2,
    },
    KeyMigration {
        old: "issue_comment_id",
        new: fields::PLAN_COMMENT_ID,
        since_version: 2,
    },
    KeyMigration {
        old: "session_id",
        new: fields::CREATED_FROM_SESSION,
        since_version: 2,
    },
];

/// Rename old keys to their current names.
///
/// When both names are present the current name wins.
pub fn migrate_keys(raw: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    let mut migrated = BTreeMap::new();
    let mut renamed = Vec::new();
    for (key, value) in raw {
        match KEY_MIGRATIONS.iter().find(|m| m.old == key) {
            Some(m) => renamed.push((m.new, value)),
            None => {
                migrated.insert(key, value);
            }
        }
    }
    for (new, value) in renamed {
        migrated.entry(new.to_string()).or_insert(value);
    }
    migrated
}

/// Current name for `name`, following renames. Used on read paths only.
pub fn current_key(name: &str) -> &str {
    KEY_MIGRATIONS
        .iter()
        .find(|m| m.old == name)
        .map_or(name, |m| m.new)
}

/// Read `schema_version` from a raw block, accepting numeric strings.
pub fn declared_version(raw: &BTreeMap<String, Value>) -> Option<u64> {
    match raw.get(fields::SCHEMA_VERSION)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ============================================================================
// Validation
// ============================================================================

impl MetadataSchema {
    /// Look up a field definition by its current name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check if `name` is an immutable field of this schema.
    pub fn is_immutable(&self, name: &str) -> bool {
        self.field(name).is_some_and(FieldDef::is_immutable)
    }

    /// Validate a full header against this schema version.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Validation`] for unknown fields, wrongly typed
    /// values, missing required fields, or a foreign `schema_version`.
    pub fn validate(&self, header: &BTreeMap<String, Value>) -> Result<()> {
        for (key, value) in header {
            let def = self.field(key).ok_or_else(|| {
                PlanError::validation(key, format!("unknown field in {} v{}", self.name, self.version))
            })?;
            def.kind
                .check(value)
                .map_err(|reason| PlanError::validation(key, reason))?;
        }

        for def in self.fields.iter().filter(|f| f.required) {
            if !header.contains_key(def.name) {
                return Err(PlanError::validation(def.name, "required field is missing"));
            }
        }

        match header.get(fields::SCHEMA_VERSION).and_then(Value::as_u64) {
            Some(v) if v == self.version => Ok(()),
            Some(v) => Err(PlanError::validation(
                fields::SCHEMA_VERSION,
                format!("writer emits version {} but header declares {}", self.version, v),
            )),
            None => Err(PlanError::validation(
                fields::SCHEMA_VERSION,
                "required field is missing",
            )),
        }
    }
}

//! Plan metadata: schema, text block codec, and patches.
//!
//! # Architecture
//!
//! ```text
//! raw block text ──parse──▶ migrate_keys ──▶ HeaderFields ──patch──▶ validate ──render──▶ block text
//!                  (block)     (schema)                   (patch)   (schema)   (block)
//! ```
//!
//! The reader accepts every supported prior version; the writer emits only
//! the current one.

pub mod block;
pub mod patch;
pub mod schema;

pub use block::{extract_block, parse_block, render_block, replace_block};
pub use patch::MetadataPatch;
pub use schema::{
    fields, FieldDef, FieldKind, KeyMigration, MetadataSchema, Mutability,
    CURRENT_SCHEMA_VERSION, KEY_MIGRATIONS, PLAN_HEADER, PLAN_HEADER_SCHEMA,
};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{PlanError, Result};
use crate::plan::{LifecycleStage, PlanId};

/// Header fields of a single plan, keyed by current field name.
///
/// Keys are kept sorted so rendering is deterministic: changing one field
/// changes exactly one line of the rendered block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderFields(BTreeMap<String, Value>);

impl HeaderFields {
    /// Start a header for a plan being created now.
    pub fn for_creation(created_by: &str, now: DateTime<Utc>) -> Self {
        let mut header = Self::default();
        header.set(fields::SCHEMA_VERSION, Value::from(CURRENT_SCHEMA_VERSION));
        header.set(
            fields::CREATED_AT,
            Value::from(now.to_rfc3339_opts(SecondsFormat::Secs, false)),
        );
        header.set(fields::CREATED_BY, Value::from(created_by));
        header.set(
            fields::LIFECYCLE_STAGE,
            Value::from(LifecycleStage::Planned.as_str()),
        );
        header
    }

    /// Decode a raw key/value map written under any supported version.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Validation`] when the declared version is
    /// missing, older than supported, or newer than this crate writes.
    pub fn from_raw(raw: BTreeMap<String, Value>) -> Result<Self> {
        let version = schema::declared_version(&raw).ok_or_else(|| {
            PlanError::validation(fields::SCHEMA_VERSION, "missing or not a number")
        })?;
        if version > CURRENT_SCHEMA_VERSION {
            return Err(PlanError::validation(
                fields::SCHEMA_VERSION,
                format!("version {version} is newer than supported {CURRENT_SCHEMA_VERSION}"),
            ));
        }
        if version < schema::MIN_SUPPORTED_SCHEMA_VERSION {
            return Err(PlanError::validation(
                fields::SCHEMA_VERSION,
                format!("version {version} is no longer supported"),
            ));
        }

        let mut migrated = schema::migrate_keys(raw);
        migrated.retain(|_, v| !v.is_null());
        migrated.insert(
            fields::SCHEMA_VERSION.to_string(),
            Value::from(CURRENT_SCHEMA_VERSION),
        );
        if version < CURRENT_SCHEMA_VERSION {
            debug!(
                "Read plan-header v{} as v{}",
                version, CURRENT_SCHEMA_VERSION
            );
        }
        Ok(Self(migrated))
    }

    /// Validate against the current schema.
    pub fn validate(&self) -> Result<()> {
        PLAN_HEADER_SCHEMA.validate(&self.0)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.0.insert(name.to_string(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> BTreeMap<String, Value> {
        self.0
    }

    fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    fn identifier(&self, name: &str) -> Option<PlanId> {
        self.get(name).and_then(PlanId::from_value)
    }

    // =========================================================================
    // Typed accessors
    // =========================================================================

    pub fn schema_version(&self) -> Option<u64> {
        self.get(fields::SCHEMA_VERSION).and_then(Value::as_u64)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.text(fields::CREATED_AT)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn created_by(&self) -> Option<&str> {
        self.text(fields::CREATED_BY)
    }

    /// Stage recorded in the header; a header without one is `planned`.
    pub fn lifecycle_stage(&self) -> LifecycleStage {
        self.text(fields::LIFECYCLE_STAGE)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    pub fn branch_name(&self) -> Option<&str> {
        self.text(fields::BRANCH_NAME)
    }

    pub fn objective_id(&self) -> Option<PlanId> {
        self.identifier(fields::OBJECTIVE_ID)
    }

    pub fn plan_comment_id(&self) -> Option<PlanId> {
        self.identifier(fields::PLAN_COMMENT_ID)
    }

    pub fn created_from_session(&self) -> Option<&str> {
        self.text(fields::CREATED_FROM_SESSION)
    }

    /// Digest recorded when the plan was created.
    ///
    /// Not refreshed by content updates; compare it against
    /// [`content_digest`] of the creation content, not the current text.
    pub fn content_digest(&self) -> Option<&str> {
        self.text(fields::CONTENT_DIGEST)
    }

    pub fn closing_reference(&self) -> Option<PlanId> {
        self.identifier(fields::CLOSING_REFERENCE)
    }

    pub fn superseded_by(&self) -> Option<PlanId> {
        self.identifier(fields::SUPERSEDED_BY)
    }

    pub fn consolidated_from(&self) -> Vec<PlanId> {
        self.get(fields::CONSOLIDATED_FROM)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(PlanId::from_value).collect())
            .unwrap_or_default()
    }
}

impl FromIterator<(String, Value)> for HeaderFields {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Digest of plan content used to recognise equivalent content.
///
/// Trailing whitespace and line-ending differences do not change the digest.
pub fn content_digest(content: &str) -> String {
    let normalized: String = content
        .replace("\r\n", "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    let hash = Sha256::digest(normalized.trim().as_bytes());
    hex::encode(&hash[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 14, 30, 0).unwrap()
    }

    #[test]
    fn test_for_creation_is_valid() {
        let header = HeaderFields::for_creation("octocat", now());
        assert!(header.validate().is_ok());
        assert_eq!(header.schema_version(), Some(CURRENT_SCHEMA_VERSION));
        assert_eq!(header.created_by(), Some("octocat"));
        assert_eq!(header.created_at(), Some(now()));
        assert_eq!(header.lifecycle_stage(), LifecycleStage::Planned);
    }

    #[test]
    fn test_from_raw_migrates_v1() {
        let raw: BTreeMap<String, Value> = [
            ("schema_version".to_string(), json!("1")),
            ("created_at".to_string(), json!("2025-01-15T14:30:00+00:00")),
            ("created_by".to_string(), json!("octocat")),
            ("lifecycle_stage".to_string(), json!("planned")),
            ("objective_issue".to_string(), json!(77)),
        ]
        .into_iter()
        .collect();
        let header = HeaderFields::from_raw(raw).unwrap();
        assert_eq!(header.schema_version(), Some(2));
        assert_eq!(header.objective_id(), Some(PlanId::Number(77)));
        assert!(header.validate().is_ok());
    }

    #[test]
    fn test_from_raw_rejects_newer_version() {
        let raw: BTreeMap<String, Value> =
            [("schema_version".to_string(), json!(9))].into_iter().collect();
        assert!(HeaderFields::from_raw(raw).is_err());
    }

    #[test]
    fn test_from_raw_drops_nulls() {
        let raw: BTreeMap<String, Value> = [
            ("schema_version".to_string(), json!(2)),
            ("branch_name".to_string(), Value::Null),
        ]
        .into_iter()
        .collect();
        let header = HeaderFields::from_raw(raw).unwrap();
        assert!(!header.contains("branch_name"));
    }

    #[test]
    fn test_stage_defaults_to_planned() {
        assert_eq!(HeaderFields::default().lifecycle_stage(), LifecycleStage::Planned);
    }

    #[test]
    fn test_consolidated_from_mixed_ids() {
        let mut header = HeaderFields::default();
        header.set("consolidated_from", json!([3, "PLN-4"]));
        assert_eq!(
            header.consolidated_from(),
            vec![PlanId::Number(3), PlanId::Key("PLN-4".into())]
        );
    }

    #[test]
    fn test_content_digest_ignores_whitespace_noise() {
        assert_eq!(
            content_digest("# Plan\n\n- step one  \n"),
            content_digest("# Plan\r\n\r\n- step one\r\n\r\n")
        );
        assert_ne!(content_digest("# Plan A"), content_digest("# Plan B"));
        assert_eq!(content_digest("x").len(), 16);
    }
}

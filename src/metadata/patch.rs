//! Metadata patches and the read-merge-write rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::schema::{fields, FieldKind, PLAN_HEADER_SCHEMA};
use super::HeaderFields;
use crate::error::{PlanError, Result};
use crate::plan::LifecycleStage;

/// A partial update to a plan header.
///
/// Fields are named by their current schema name. A `null` value clears a
/// mutable field. Fields not marked immutable in the schema are settable
/// without any change here.
///
/// # Example
///
/// ```
/// use planstore::metadata::MetadataPatch;
/// use planstore::plan::LifecycleStage;
///
/// let patch = MetadataPatch::new()
///     .stage(LifecycleStage::Implementing)
///     .set("last_local_impl_session", "sess-42")
///     .with_comment_ref("last_event_comment_id");
/// assert_eq!(patch.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataPatch {
    fields: BTreeMap<String, Value>,
    /// Field that receives the id of the comment posted alongside the patch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment_ref_field: Option<String>,
}

impl MetadataPatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field.
    #[must_use]
    pub fn set(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Clear a field.
    #[must_use]
    pub fn clear(mut self, name: &str) -> Self {
        self.fields.insert(name.to_string(), Value::Null);
        self
    }

    /// Set the lifecycle stage.
    #[must_use]
    pub fn stage(self, stage: LifecycleStage) -> Self {
        self.set(fields::LIFECYCLE_STAGE, stage.as_str())
    }

    /// Fill `field` with the id of the comment posted in the same event.
    #[must_use]
    pub fn with_comment_ref(mut self, field: &str) -> Self {
        self.comment_ref_field = Some(field.to_string());
        self
    }

    pub fn comment_ref_field(&self) -> Option<&str> {
        self.comment_ref_field.as_deref()
    }

    /// Resolve the comment reference now that the comment exists.
    pub fn resolve_comment_ref(&mut self, comment_id: Value) {
        if let Some(field) = self.comment_ref_field.take() {
            self.fields.insert(field, comment_id);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.comment_ref_field.is_none()
    }

    /// The stage this patch moves to, if it sets one.
    pub fn target_stage(&self) -> Option<LifecycleStage> {
        self.fields
            .get(fields::LIFECYCLE_STAGE)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    /// Check field names and value types without looking at a stored header.
    ///
    /// Lets compound operations reject a bad patch before they write
    /// anything else.
    pub fn check_fields(&self) -> Result<()> {
        for (name, value) in &self.fields {
            let def = PLAN_HEADER_SCHEMA
                .field(name)
                .ok_or_else(|| PlanError::validation(name, "unknown field"))?;
            if !value.is_null() {
                def.kind
                    .check(value)
                    .map_err(|reason| PlanError::validation(name, reason))?;
            }
        }
        if let Some(field) = &self.comment_ref_field {
            match PLAN_HEADER_SCHEMA.field(field) {
                Some(def) if def.kind == FieldKind::Identifier && !def.is_immutable() => {}
                _ => {
                    return Err(PlanError::validation(
                        field,
                        "comment reference must target a mutable identifier field",
                    ))
                }
            }
        }
        Ok(())
    }

    /// Merge into `current`, producing the header to write.
    ///
    /// Only the patched keys change; everything else keeps its current
    /// value, so concurrent writers to different fields do not clobber
    /// each other (last write wins per field).
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Validation`] if the patch names an unknown
    /// field, changes or clears an immutable field, or the merged header
    /// fails schema validation. `current` is never modified.
    pub fn apply(&self, current: &HeaderFields) -> Result<HeaderFields> {
        if let Some(field) = &self.comment_ref_field {
            return Err(PlanError::validation(
                field,
                "comment reference is unresolved; post the comment first",
            ));
        }

        let mut merged = current.clone();
        for (name, value) in &self.fields {
            let def = PLAN_HEADER_SCHEMA
                .field(name)
                .ok_or_else(|| PlanError::validation(name, "unknown field"))?;

            if def.is_immutable() {
                match (current.get(name), value) {
                    (_, Value::Null) => {
                        return Err(PlanError::validation(name, "immutable field cannot be cleared"));
                    }
                    (Some(existing), new) if existing != new => {
                        return Err(PlanError::validation(
                            name,
                            format!("immutable field cannot change from {existing} to {new}"),
                        ));
                    }
                    _ => {}
                }
            }

            if value.is_null() {
                merged.remove(name);
            } else {
                merged.set(name, value.clone());
            }
        }

        merged.validate()?;
        Ok(merged)
    }
}

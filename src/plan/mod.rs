//! The plan entity and the queries run over it.

pub mod identity;
pub mod lifecycle;

pub use identity::{PlanId, PlanRef, Provider};
pub use lifecycle::{ConsolidationMarker, LifecycleStage, PlanState};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::metadata::{HeaderFields, MetadataPatch};

/// A plan as materialized from its backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub title: String,
    /// Plan body
    pub content: String,
    pub header_fields: HeaderFields,
    /// Pre-extracted from `header_fields`
    pub objective_id: Option<PlanId>,
    pub lifecycle_stage: LifecycleStage,
    pub provider: Provider,
    pub state: PlanState,
    pub labels: BTreeSet<String>,
    pub url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Plan {
    /// Assemble a plan, deriving the pre-extracted fields from the header.
    pub fn assemble(
        provider: Provider,
        id: PlanId,
        title: impl Into<String>,
        content: impl Into<String>,
        header_fields: HeaderFields,
    ) -> Self {
        Self {
            objective_id: header_fields.objective_id(),
            lifecycle_stage: header_fields.lifecycle_stage(),
            created_at: header_fields.created_at(),
            id,
            title: title.into(),
            content: content.into(),
            header_fields,
            provider,
            state: PlanState::Open,
            labels: BTreeSet::new(),
            url: None,
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: PlanState) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub fn with_labels(mut self, labels: impl IntoIterator<Item = String>) -> Self {
        self.labels = labels.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }

    pub fn plan_ref(&self) -> PlanRef {
        PlanRef {
            provider: self.provider,
            id: self.id.clone(),
            url: self.url.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }
}

/// Input to `create_plan`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewPlan {
    pub title: String,
    pub content: String,
    /// Extra header fields set at creation
    pub metadata: MetadataPatch,
    pub labels: Vec<String>,
    /// Identity recorded as `created_by`
    pub created_by: String,
}

impl NewPlan {
    pub fn new(title: impl Into<String>, content: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            created_by: created_by.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: MetadataPatch) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }
}

/// Criteria for `list_plans`.
///
/// Every set criterion must match; unset criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanQuery {
    pub state: Option<PlanState>,
    pub stage: Option<LifecycleStage>,
    /// Labels a plan must carry
    pub labels: Vec<String>,
    /// Labels a plan must not carry
    pub exclude_labels: Vec<String>,
    pub created_from_session: Option<String>,
    pub limit: Option<usize>,
}

impl PlanQuery {
    #[must_use]
    pub fn open() -> Self {
        Self {
            state: Some(PlanState::Open),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_stage(mut self, stage: LifecycleStage) -> Self {
        self.stage = Some(stage);
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    #[must_use]
    pub fn without_label(mut self, label: impl Into<String>) -> Self {
        self.exclude_labels.push(label.into());
        self
    }

    #[must_use]
    pub fn from_session(mut self, session_id: impl Into<String>) -> Self {
        self.created_from_session = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check the criteria that can be evaluated on a materialized plan.
    pub fn matches(&self, plan: &Plan) -> bool {
        self.state.is_none_or(|s| s == plan.state)
            && self.stage.is_none_or(|s| s == plan.lifecycle_stage)
            && self.labels.iter().all(|l| plan.has_label(l))
            && !self.exclude_labels.iter().any(|l| plan.has_label(l))
            && self
                .created_from_session
                .as_deref()
                .is_none_or(|s| plan.header_fields.created_from_session() == Some(s))
    }

    /// Filter, order by id and truncate.
    pub fn apply(&self, plans: impl IntoIterator<Item = Plan>) -> Vec<Plan> {
        let mut matched: Vec<Plan> = plans.into_iter().filter(|p| self.matches(p)).collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn plan(n: u64) -> Plan {
        let header = HeaderFields::for_creation(
            "octocat",
            Utc.with_ymd_and_hms(2025, 1, 15, 14, 30, 0).unwrap(),
        );
        Plan::assemble(Provider::Issues, PlanId::Number(n), "t", "c", header)
    }

    #[test]
    fn test_assemble_extracts_fields() {
        let mut header = HeaderFields::for_creation(
            "octocat",
            Utc.with_ymd_and_hms(2025, 1, 15, 14, 30, 0).unwrap(),
        );
        header.set("objective_id", json!(9));
        header.set("lifecycle_stage", json!("implementing"));
        let plan = Plan::assemble(Provider::DraftPr, PlanId::Number(3), "t", "c", header);
        assert_eq!(plan.objective_id, Some(PlanId::Number(9)));
        assert_eq!(plan.lifecycle_stage, LifecycleStage::Implementing);
        assert!(plan.created_at.is_some());
    }

    #[test]
    fn test_query_labels_and_exclusions() {
        let a = plan(1).with_labels(vec!["plan".to_string()]);
        let b = plan(2).with_labels(vec!["plan".to_string(), "consolidated".to_string()]);
        let q = PlanQuery::default().with_label("plan").without_label("consolidated");
        assert!(q.matches(&a));
        assert!(!q.matches(&b));
    }

    #[test]
    fn test_query_state_and_session() {
        let mut p = plan(1);
        p.header_fields.set("created_from_session", json!("s1"));
        assert!(PlanQuery::open().from_session("s1").matches(&p));
        assert!(!PlanQuery::open().from_session("s2").matches(&p));
        assert!(!PlanQuery::open().matches(&p.clone().with_state(PlanState::Closed)));
    }

    #[test]
    fn test_query_apply_orders_and_limits() {
        let out = PlanQuery::default()
            .with_limit(2)
            .apply(vec![plan(5), plan(1), plan(3)]);
        let ids: Vec<_> = out.iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec![PlanId::Number(1), PlanId::Number(3)]);
    }
}

//! Merging plans into one, and replacing a plan with a new version.
//!
//! Both operations create an output plan and retire the sources: each
//! source gets a `Superseded by` comment, its `superseded_by` field set and
//! is closed. Only a merge of two or more sources marks the output as
//! consolidated; that marker keeps it out of later consolidation runs. A
//! single-source replan stays an ordinary plan.
//!
//! Every step checks whether it already happened, so a run interrupted
//! half way can be repeated with the same request to finish it.

use serde_json::Value;
use tracing::{debug, info};

use crate::backend::PlanBackend;
use crate::dedup::create_plan_once;
use crate::error::{PlanError, Result};
use crate::metadata::{fields, MetadataPatch};
use crate::plan::{ConsolidationMarker, NewPlan, Plan, PlanId, PlanQuery};
use crate::session::MarkerStore;

/// Which operation produced an output plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsolidationKind {
    /// Two or more sources merged
    Merge,
    /// One source replaced
    Replan,
}

/// Result of [`consolidate`] or [`replan`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidationOutcome {
    pub kind: ConsolidationKind,
    pub plan: Plan,
    /// Sources closed by this run
    pub closed: Vec<PlanId>,
    /// Sources a previous run had already closed
    pub already_closed: Vec<PlanId>,
}

/// Whether `plan` may be picked as a consolidation input.
pub fn is_candidate(plan: &Plan, consolidated_label: &str) -> bool {
    !plan.is_closed() && is_consolidation_input(plan, consolidated_label)
}

/// Open plans eligible for consolidation.
pub fn candidates(backend: &dyn PlanBackend, consolidated_label: &str) -> Result<Vec<Plan>> {
    let query = PlanQuery::open().without_label(consolidated_label);
    Ok(backend
        .list_plans(&query)?
        .into_iter()
        .filter(|p| is_candidate(p, consolidated_label))
        .collect())
}

/// Merge `sources` into one new plan.
///
/// `session_id` keys the idempotent creation of the output; repeat a
/// failed run with the same session to resume it.
///
/// # Errors
///
/// - [`PlanError::Validation`] with fewer than two distinct sources
/// - [`PlanError::NotFound`] if a source does not exist
/// - [`PlanError::Lifecycle`] if a source is itself consolidated, or was
///   closed for another reason
pub fn consolidate(
    backend: &dyn PlanBackend,
    markers: &dyn MarkerStore,
    consolidated_label: &str,
    sources: &[PlanId],
    output: NewPlan,
    session_id: &str,
) -> Result<ConsolidationOutcome> {
    let mut ids: Vec<PlanId> = Vec::new();
    for id in sources {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }
    if ids.len() < 2 {
        return Err(PlanError::validation(
            "sources",
            "consolidation needs at least two distinct plans; use replan for one",
        ));
    }

    let plans = load_sources(backend, &ids)?;
    if let Some(plan) = plans.iter().find(|p| !is_consolidation_input(p, consolidated_label)) {
        return Err(PlanError::lifecycle(
            plan.id.clone(),
            "consolidated plans cannot be consolidated again",
        ));
    }

    let provenance = Value::Array(ids.iter().map(PlanId::to_value).collect());
    let output = NewPlan {
        metadata: output.metadata.clone().set(fields::CONSOLIDATED_FROM, provenance),
        ..output
    };
    let created = create_plan_once(backend, markers, session_id, output)?;
    let mut plan = created.plan;

    if !plan.has_label(consolidated_label) {
        backend.add_label(&plan.id, consolidated_label)?;
        plan.labels.insert(consolidated_label.to_string());
    }

    retire_sources(backend, ConsolidationKind::Merge, plan, &plans)
}

/// Replace `source` with a new plan.
///
/// The output is not marked consolidated and stays eligible for later
/// consolidation.
pub fn replan(
    backend: &dyn PlanBackend,
    markers: &dyn MarkerStore,
    source: &PlanId,
    output: NewPlan,
    session_id: &str,
) -> Result<ConsolidationOutcome> {
    let plans = load_sources(backend, std::slice::from_ref(source))?;
    let created = create_plan_once(backend, markers, session_id, output)?;
    retire_sources(backend, ConsolidationKind::Replan, created.plan, &plans)
}

/// A consolidated plan is never an input. Either the label or recorded
/// provenance marks it; a lost label does not make it eligible again.
fn is_consolidation_input(plan: &Plan, consolidated_label: &str) -> bool {
    ConsolidationMarker::from_labels(&plan.labels, consolidated_label).is_eligible_input()
        && plan.header_fields.consolidated_from().is_empty()
}

fn load_sources(backend: &dyn PlanBackend, ids: &[PlanId]) -> Result<Vec<Plan>> {
    let mut plans = Vec::with_capacity(ids.len());
    for id in ids {
        let plan = backend
            .get_plan(id)?
            .ok_or_else(|| PlanError::NotFound { id: id.clone() })?;
        if plan.is_closed() && plan.header_fields.superseded_by().is_none() {
            return Err(PlanError::lifecycle(id.clone(), "plan is closed"));
        }
        plans.push(plan);
    }
    Ok(plans)
}

fn retire_sources(
    backend: &dyn PlanBackend,
    kind: ConsolidationKind,
    plan: Plan,
    sources: &[Plan],
) -> Result<ConsolidationOutcome> {
    let mut closed = Vec::new();
    let mut already_closed = Vec::new();

    for source in sources {
        let superseded_by = source.header_fields.superseded_by();
        if source.is_closed() {
            if superseded_by.as_ref() != Some(&plan.id) {
                return Err(PlanError::lifecycle(
                    source.id.clone(),
                    "plan was superseded by a different plan",
                ));
            }
            debug!("Source {} already retired", source.id);
            already_closed.push(source.id.clone());
            continue;
        }

        if superseded_by.as_ref() != Some(&plan.id) {
            let comment = format!("Superseded by {}", plan.id);
            let patch = MetadataPatch::new().set(fields::SUPERSEDED_BY, plan.id.to_value());
            backend.post_event(&source.id, Some(&comment), Some(patch))?;
        }
        backend.close_plan(&source.id)?;
        closed.push(source.id.clone());
    }

    info!(
        "{:?} produced plan {} from {} source(s)",
        kind,
        plan.id,
        sources.len()
    );
    Ok(ConsolidationOutcome {
        kind,
        plan,
        closed,
        already_closed,
    })
}

//! Plan lifecycle stages and the consolidation marker.
//!
//! This module contains the state machine types for plans:
//! - [`LifecycleStage`] - where a plan is in its implementation journey
//! - [`PlanState`] - whether the underlying container is open or closed
//! - [`ConsolidationMarker`] - whether the plan is the output of a merge

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Lifecycle Stage
// ============================================================================

/// Implementation stage of a plan.
///
/// # State Transitions
///
/// - `Planned` -> `Implementing`: implementation work begins
/// - `Implementing` -> `Implemented`: implementation merged
/// - `Planned` -> `Implemented`: implemented outside the tracked flow
///
/// There are no reverse transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    #[default]
    Planned,
    Implementing,
    Implemented,
}

impl LifecycleStage {
    /// All stages in order.
    pub const ALL: [LifecycleStage; 3] = [
        LifecycleStage::Planned,
        LifecycleStage::Implementing,
        LifecycleStage::Implemented,
    ];

    /// Value stored in the `lifecycle_stage` metadata field.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStage::Planned => "planned",
            LifecycleStage::Implementing => "implementing",
            LifecycleStage::Implemented => "implemented",
        }
    }

    /// Check if this stage can move to `target`.
    ///
    /// Staying on the same stage is allowed and is a no-op for callers.
    ///
    /// # Example
    ///
    /// ```
    /// use planstore::plan::LifecycleStage;
    ///
    /// assert!(LifecycleStage::Planned.can_transition_to(LifecycleStage::Implementing));
    /// assert!(!LifecycleStage::Implemented.can_transition_to(LifecycleStage::Planned));
    /// ```
    #[must_use]
    pub fn can_transition_to(&self, target: LifecycleStage) -> bool {
        target >= *self
    }

    /// Check if this stage represents active work.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, LifecycleStage::Implementing)
    }

    /// Check if no further stage exists.
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, LifecycleStage::Implemented)
    }
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "planned" => Ok(LifecycleStage::Planned),
            "implementing" => Ok(LifecycleStage::Implementing),
            "implemented" => Ok(LifecycleStage::Implemented),
            other => Err(format!(
                "Unknown lifecycle stage: {other}. Valid options: planned, implementing, implemented"
            )),
        }
    }
}

// ============================================================================
// Plan State
// ============================================================================

/// Open/closed state of the container holding a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    #[default]
    Open,
    /// Terminal. Only reference comments may be added.
    Closed,
}

impl PlanState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanState::Closed)
    }
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanState::Open => write!(f, "open"),
            PlanState::Closed => write!(f, "closed"),
        }
    }
}

// ============================================================================
// Consolidation Marker
// ============================================================================

/// Whether a plan was produced by merging several other plans.
///
/// Stored as a label on the container, independent of the lifecycle stage.
/// Once consolidated, a plan never becomes an input to another
/// consolidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConsolidationMarker {
    #[default]
    Unconsolidated,
    Consolidated,
}

impl ConsolidationMarker {
    /// Read the marker from a plan's labels.
    pub fn from_labels<'a>(
        labels: impl IntoIterator<Item = &'a String>,
        consolidated_label: &str,
    ) -> Self {
        if labels.into_iter().any(|l| l == consolidated_label) {
            ConsolidationMarker::Consolidated
        } else {
            ConsolidationMarker::Unconsolidated
        }
    }

    /// Check if a plan with this marker may be selected as a consolidation input.
    #[must_use]
    pub fn is_eligible_input(&self) -> bool {
        matches!(self, ConsolidationMarker::Unconsolidated)
    }
}

//! planstore - backend-agnostic plan storage
//!
//! Keeps implementation plans, their versioned metadata and their
//! lifecycle in whichever tracker a team already uses: issues with a
//! companion comment, draft pull requests, or a ticket system.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`plan`] - The plan entity, identifiers and lifecycle stages
//! - [`metadata`] - Versioned header schema, text block codec and patches
//! - [`backend`] - The [`PlanBackend`] interface and its three implementations
//! - [`store`] - Issue/PR and ticket collaborator traits with in-memory stores
//! - [`session`] - Session-scoped markers
//! - [`staging`] - Session-keyed scratch area for plan content
//! - [`dedup`] - Idempotent plan creation
//! - [`consolidation`] - Merging and replacing plans
//! - [`git`] and [`sync`] - Bringing a plan branch up to date
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Error types and classification
//! - [`testing`] - Testing infrastructure (mocks, fixtures)
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use planstore::backend::{BackendOptions, IssueBackend, PlanBackend};
//! use planstore::metadata::MetadataPatch;
//! use planstore::plan::{LifecycleStage, NewPlan};
//! use planstore::store::MemoryContainerStore;
//!
//! let backend = IssueBackend::new(Arc::new(MemoryContainerStore::new()), BackendOptions::default());
//! let plan = backend.create_plan(NewPlan::new("Add retries", "1. Retry on 502", "octocat")).unwrap();
//!
//! backend
//!     .update_metadata(&plan.id, MetadataPatch::new().stage(LifecycleStage::Implementing))
//!     .unwrap();
//! let plan = backend.get_plan(&plan.id).unwrap().unwrap();
//! assert_eq!(plan.lifecycle_stage, LifecycleStage::Implementing);
//! ```

pub mod backend;
pub mod config;
pub mod consolidation;
pub mod dedup;
pub mod error;
pub mod git;
pub mod metadata;
pub mod persist;
pub mod plan;
pub mod session;
pub mod staging;
pub mod store;
pub mod sync;
pub mod testing;

// Re-export commonly used types
pub use error::{PlanError, ProviderContext, Result};

pub use backend::{
    load_backend, CommentId, DraftPrBackend, FieldLookup, IssueBackend, PlanBackend,
    StoreClients, TicketBackend,
};
pub use config::StoreConfig;
pub use metadata::{HeaderFields, MetadataPatch};
pub use plan::{LifecycleStage, NewPlan, Plan, PlanId, PlanQuery, PlanRef, PlanState, Provider};

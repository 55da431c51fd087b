//! Error types for plan store operations.
//!
//! Absence of a plan on a read path is not an error: reads return `Option`
//! or [`FieldLookup`](crate::backend::FieldLookup) so every call site has to
//! handle it. The variants here cover the failures a caller must be able to
//! tell apart: not found on a write, not permitted in the current lifecycle
//! stage, and transient provider failure.

use std::path::PathBuf;
use thiserror::Error;

use crate::plan::{PlanId, Provider};

/// Main error type for plan store operations
#[derive(Error, Debug)]
pub enum PlanError {
    // =========================================================================
    // Lookup Errors
    // =========================================================================
    /// A write targeted a plan that does not exist
    #[error("Plan not found: {id}")]
    NotFound { id: PlanId },

    /// No plan is recorded for a working branch
    #[error("No plan found for branch '{branch}'")]
    UnknownBranch { branch: String },

    // =========================================================================
    // Schema Errors
    // =========================================================================
    /// Metadata failed schema validation or touched an immutable field
    #[error("Invalid metadata field '{field}': {reason}")]
    Validation { field: String, reason: String },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// Operation not permitted in the plan's current stage or state
    #[error("Not permitted for plan {id}: {reason}")]
    Lifecycle { id: PlanId, reason: String },

    // =========================================================================
    // Sync Errors
    // =========================================================================
    /// Local branch could not be reconciled with the remote
    #[error("Branch '{branch}' diverged from remote: {message}")]
    SyncConflict {
        branch: String,
        message: String,
        conflicted_paths: Vec<String>,
    },

    // =========================================================================
    // Caller Errors
    // =========================================================================
    /// An identifier or operation belonging to one backend reached another
    #[error("Backend mismatch: {backend} backend cannot handle {got}")]
    BackendMismatch { backend: Provider, got: String },

    // =========================================================================
    // Provider Errors
    // =========================================================================
    /// Transient failure talking to the underlying store
    #[error("Provider operation failed: {operation} - {message}")]
    Provider { operation: String, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    Config { field: String, reason: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// Failed to read or write a local file
    #[error("I/O error at {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PlanError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a validation error
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a lifecycle error
    pub fn lifecycle(id: PlanId, reason: impl Into<String>) -> Self {
        Self::Lifecycle {
            id,
            reason: reason.into(),
        }
    }

    /// Create a provider error
    pub fn provider(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a backend mismatch error
    pub fn mismatch(backend: Provider, got: impl Into<String>) -> Self {
        Self::BackendMismatch {
            backend,
            got: got.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Provider { .. } | Self::Io(_) | Self::File { .. })
    }

    /// Check if this error indicates a bug in the caller
    pub fn is_caller_bug(&self) -> bool {
        matches!(self, Self::BackendMismatch { .. })
    }

    /// Check if the error was raised before anything reached storage
    pub fn is_rejected_before_write(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::Lifecycle { .. } | Self::BackendMismatch { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } | Self::UnknownBranch { .. } => 2,
            Self::Validation { .. } => 3,
            Self::Lifecycle { .. } => 4,
            Self::SyncConflict { .. } => 5,
            Self::Provider { .. } => 6,
            Self::Config { .. } => 7,
            Self::BackendMismatch { .. } => 70,
            _ => 1,
        }
    }
}

/// Type alias for plan store results
pub type Result<T> = std::result::Result<T, PlanError>;

/// Extension trait for turning collaborator errors into [`PlanError::Provider`]
pub trait ProviderContext<T> {
    fn provider(self, operation: &str) -> Result<T>;
}

impl<T, E: Into<anyhow::Error>> ProviderContext<T> for std::result::Result<T, E> {
    fn provider(self, operation: &str) -> Result<T> {
        self.map_err(|e| PlanError::provider(operation, format!("{:#}", e.into())))
    }
}

//! Configuration for the plan store, loaded from `.planstore/config.toml`.
//!
//! Every field has a default, so a missing file or a partial one is valid.
//!
//! ```toml
//! provider = "draft_pr"
//! remote = "origin"
//! trunk_branch = "main"
//! source_repo = "acme/widgets"
//!
//! [labels]
//! plan = "planstore-plan"
//! consolidated = "planstore-consolidated"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::BackendOptions;
use crate::error::{PlanError, Result};
use crate::plan::Provider;

/// Directory holding configuration and local state.
pub const STATE_DIR: &str = ".planstore";

/// Label names applied by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    /// Carried by every plan
    pub plan: String,
    /// Marks the output of a multi-plan consolidation
    pub consolidated: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            plan: "planstore-plan".to_string(),
            consolidated: "planstore-consolidated".to_string(),
        }
    }
}

/// Plan store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub provider: Provider,
    /// Git remote plan branches are synced with
    pub remote: String,
    /// Base branch of draft pull requests
    pub trunk_branch: String,
    /// Repository recorded on new plans
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_repo: Option<String>,
    /// Key prefix for new tickets
    pub ticket_prefix: String,
    /// Identity recorded as `created_by`; falls back to `$USER`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub labels: LabelConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Issues,
            remote: "origin".to_string(),
            trunk_branch: "main".to_string(),
            source_repo: None,
            ticket_prefix: "PLN".to_string(),
            user: None,
            labels: LabelConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from a project directory, or the defaults if
    /// there is no config file.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Config`] if the file is not valid TOML or
    /// fails [`validate`](Self::validate).
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = Self::config_path(project_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).map_err(|source| PlanError::File {
            path: path.clone(),
            source,
        })?;
        let config: StoreConfig = toml::from_str(&content)
            .map_err(|e| PlanError::config(path.display().to_string(), e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration to the project directory.
    pub fn save(&self, project_dir: &Path) -> Result<()> {
        self.validate()?;
        let path = Self::config_path(project_dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| PlanError::config("config", e.to_string()))?;
        fs::write(&path, content).map_err(|source| PlanError::File { path, source })
    }

    /// Check values that deserialize fine but cannot work.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("remote", &self.remote),
            ("trunk_branch", &self.trunk_branch),
            ("labels.plan", &self.labels.plan),
            ("labels.consolidated", &self.labels.consolidated),
        ] {
            if value.trim().is_empty() {
                return Err(PlanError::config(field, "must not be empty"));
            }
        }
        if self.labels.plan == self.labels.consolidated {
            return Err(PlanError::config(
                "labels.consolidated",
                "must differ from labels.plan",
            ));
        }
        let prefix_ok = self
            .ticket_prefix
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_uppercase())
            && self
                .ticket_prefix
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
        if !prefix_ok {
            return Err(PlanError::config(
                "ticket_prefix",
                format!("'{}' must be uppercase letters and digits", self.ticket_prefix),
            ));
        }
        Ok(())
    }

    /// Identity recorded on new plans.
    pub fn resolve_user(&self) -> String {
        self.user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            plan_label: self.labels.plan.clone(),
            trunk_branch: self.trunk_branch.clone(),
            source_repo: self.source_repo.clone(),
        }
    }

    // =========================================================================
    // Paths
    // =========================================================================

    pub fn state_dir(project_dir: &Path) -> PathBuf {
        project_dir.join(STATE_DIR)
    }

    pub fn config_path(project_dir: &Path) -> PathBuf {
        Self::state_dir(project_dir).join("config.toml")
    }

    /// Local issue and pull request store.
    pub fn containers_path(project_dir: &Path) -> PathBuf {
        Self::state_dir(project_dir).join("containers.json")
    }

    /// Local ticket store.
    pub fn tickets_path(project_dir: &Path) -> PathBuf {
        Self::state_dir(project_dir).join("tickets.json")
    }

    /// Session markers.
    pub fn sessions_dir(project_dir: &Path) -> PathBuf {
        Self::state_dir(project_dir).join("sessions")
    }

    /// Staged plan content.
    pub fn scratch_dir(project_dir: &Path) -> PathBuf {
        Self::state_dir(project_dir).join("scratch")
    }

    /// Held by one command at a time while it reads and writes the stores.
    pub fn lock_path(project_dir: &Path) -> PathBuf {
        Self::state_dir(project_dir).join("store.lock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_config_default() {
        let config = StoreConfig::default();
        assert_eq!(config.provider, Provider::Issues);
        assert_eq!(config.labels.plan, "planstore-plan");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_store_config_load_missing() {
        let temp = TempDir::new().unwrap();
        let config = StoreConfig::load(temp.path()).unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_store_config_load_partial() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join(STATE_DIR)).unwrap();
        std::fs::write(
            StoreConfig::config_path(temp.path()),
            "provider = \"draft_pr\"\n\n[labels]\nconsolidated = \"merged-plan\"\n",
        )
        .unwrap();

        let config = StoreConfig::load(temp.path()).unwrap();
        assert_eq!(config.provider, Provider::DraftPr);
        assert_eq!(config.labels.consolidated, "merged-plan");
        assert_eq!(config.labels.plan, "planstore-plan");
        assert_eq!(config.remote, "origin");
    }

    #[test]
    fn test_store_config_save_roundtrip() {
        let temp = TempDir::new().unwrap();
        let config = StoreConfig {
            provider: Provider::Tickets,
            source_repo: Some("acme/widgets".to_string()),
            ..StoreConfig::default()
        };
        config.save(temp.path()).unwrap();
        assert_eq!(StoreConfig::load(temp.path()).unwrap(), config);
    }

    #[test]
    fn test_store_config_rejects_bad_values() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join(STATE_DIR)).unwrap();
        std::fs::write(
            StoreConfig::config_path(temp.path()),
            "provider = \"carrier_pigeon\"\n",
        )
        .unwrap();
        assert!(matches!(
            StoreConfig::load(temp.path()),
            Err(PlanError::Config { .. })
        ));

        let same_labels = StoreConfig {
            labels: LabelConfig {
                plan: "x".into(),
                consolidated: "x".into(),
            },
            ..StoreConfig::default()
        };
        assert!(same_labels.validate().is_err());

        let bad_prefix = StoreConfig {
            ticket_prefix: "pln".into(),
            ..StoreConfig::default()
        };
        assert!(bad_prefix.validate().is_err());
    }

    #[test]
    fn test_resolve_user_prefers_config() {
        let config = StoreConfig {
            user: Some("octocat".into()),
            ..StoreConfig::default()
        };
        assert_eq!(config.resolve_user(), "octocat");
    }

    #[test]
    fn test_paths() {
        let dir = Path::new("/work");
        assert_eq!(StoreConfig::config_path(dir), PathBuf::from("/work/.planstore/config.toml"));
        assert_eq!(StoreConfig::sessions_dir(dir), PathBuf::from("/work/.planstore/sessions"));
        assert_eq!(StoreConfig::lock_path(dir), PathBuf::from("/work/.planstore/store.lock"));
    }
}

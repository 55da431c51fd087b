//! Session-keyed scratch area for handing plan content across the
//! create → implement boundary.
//!
//! Before a plan exists its body is staged here; once the container is
//! created, a [`PlanRef`] is written next to it so the implementing side can
//! find the plan without re-deriving the content.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PlanError, Result};
use crate::persist;
use crate::plan::PlanRef;
use crate::session::validate_session_id;

/// Staged plan body file name.
const CONTENT_FILE: &str = "plan.md";

/// Plan reference file name.
const PLAN_REF_FILE: &str = "plan-ref.json";

/// Transient, session-keyed location for plan content and references.
pub trait ContentStaging {
    fn stage_content(&self, session_id: &str, content: &str) -> Result<()>;

    /// The staged body, or `None` if nothing was staged for the session.
    fn staged_content(&self, session_id: &str) -> Result<Option<String>>;

    fn record_plan_ref(&self, session_id: &str, plan_ref: &PlanRef) -> Result<()>;

    fn plan_ref(&self, session_id: &str) -> Result<Option<PlanRef>>;

    /// Remove everything staged for the session.
    fn clear(&self, session_id: &str) -> Result<()>;
}

/// Staging area on the local file system.
#[derive(Debug, Clone)]
pub struct FileContentStaging {
    dir: PathBuf,
}

impl FileContentStaging {
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn session_dir(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(session_id))
    }
}

impl ContentStaging for FileContentStaging {
    fn stage_content(&self, session_id: &str, content: &str) -> Result<()> {
        let dir = self.session_dir(session_id)?;
        fs::create_dir_all(&dir).map_err(|source| PlanError::File {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(CONTENT_FILE);
        fs::write(&path, content).map_err(|source| PlanError::File { path, source })
    }

    fn staged_content(&self, session_id: &str) -> Result<Option<String>> {
        let path = self.session_dir(session_id)?.join(CONTENT_FILE);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PlanError::File { path, source }),
        }
    }

    fn record_plan_ref(&self, session_id: &str, plan_ref: &PlanRef) -> Result<()> {
        let path = self.session_dir(session_id)?.join(PLAN_REF_FILE);
        persist::save_json(&path, plan_ref)?;
        Ok(())
    }

    fn plan_ref(&self, session_id: &str) -> Result<Option<PlanRef>> {
        let path = self.session_dir(session_id)?.join(PLAN_REF_FILE);
        Ok(persist::load_json(&path)?)
    }

    fn clear(&self, session_id: &str) -> Result<()> {
        let dir = self.session_dir(session_id)?;
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|source| PlanError::File { path: dir, source })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{PlanId, Provider};
    use tempfile::TempDir;

    #[test]
    fn test_stage_and_read_content() {
        let temp = TempDir::new().unwrap();
        let staging = FileContentStaging::new(temp.path());
        assert!(staging.staged_content("s1").unwrap().is_none());
        staging.stage_content("s1", "# Plan\n\n1. Do it").unwrap();
        assert_eq!(
            staging.staged_content("s1").unwrap().as_deref(),
            Some("# Plan\n\n1. Do it")
        );
    }

    #[test]
    fn test_plan_ref_roundtrip_and_clear() {
        let temp = TempDir::new().unwrap();
        let staging = FileContentStaging::new(temp.path());
        let plan_ref = PlanRef::new(Provider::Tickets, PlanId::Key("PLN-1".into()));
        staging.record_plan_ref("s1", &plan_ref).unwrap();
        assert_eq!(staging.plan_ref("s1").unwrap(), Some(plan_ref));

        staging.clear("s1").unwrap();
        assert!(staging.plan_ref("s1").unwrap().is_none());
    }

    #[test]
    fn test_rejects_bad_session_id() {
        let temp = TempDir::new().unwrap();
        let staging = FileContentStaging::new(temp.path());
        assert!(staging.stage_content("../x", "c").is_err());
    }
}

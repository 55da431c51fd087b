//! File-backed marker store.
//!
//! Each session keeps its markers in `sessions/<session_id>/markers.json`
//! under the store root. Every read-modify-write holds an exclusive file
//! lock and replaces the file atomically, so a crash mid-write never leaves
//! a half-written marker file behind.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{read_from, validate_session_id, Marker, MarkerKind, MarkerStore};
use crate::error::Result;
use crate::persist;

/// Marker file name inside a session directory.
const MARKERS_FILE: &str = "markers.json";

/// Marker store persisted under a directory.
#[derive(Debug, Clone)]
pub struct FileMarkerStore {
    /// Directory holding one subdirectory per session.
    dir: PathBuf,
}

impl FileMarkerStore {
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Directory holding a session's files.
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.dir.join(session_id)
    }

    /// Path to a session's marker file.
    pub fn markers_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(MARKERS_FILE)
    }

    fn update<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut BTreeMap<String, Marker>) -> T,
    ) -> Result<T> {
        validate_session_id(session_id)?;
        let path = self.markers_path(session_id);
        let out = persist::with_exclusive_lock(&path, || {
            let mut markers: BTreeMap<String, Marker> =
                persist::load_json(&path)?.unwrap_or_default();
            let before = markers.clone();
            let out = f(&mut markers);
            if markers != before {
                persist::save_json(&path, &markers)?;
            }
            Ok(out)
        })?;
        Ok(out)
    }
}

impl MarkerStore for FileMarkerStore {
    fn put(&self, session_id: &str, name: &str, kind: MarkerKind, value: &str) -> Result<()> {
        self.update(session_id, |markers| {
            markers.insert(name.to_string(), Marker::new(session_id, name, kind, value));
        })
    }

    fn read(&self, session_id: &str, name: &str) -> Result<Option<Marker>> {
        if validate_session_id(session_id).is_err() || !self.markers_path(session_id).exists() {
            return Ok(None);
        }
        self.update(session_id, |markers| read_from(markers, name))
    }

    fn delete(&self, session_id: &str, name: &str) -> Result<()> {
        if !self.markers_path(session_id).exists() {
            return Ok(());
        }
        self.update(session_id, |markers| {
            markers.remove(name);
        })
    }

    fn list(&self, session_id: &str) -> Result<Vec<String>> {
        validate_session_id(session_id)?;
        let markers: BTreeMap<String, Marker> =
            persist::load_json(&self.markers_path(session_id))?.unwrap_or_default();
        Ok(markers.into_keys().collect())
    }

    fn clear_session(&self, session_id: &str) -> Result<()> {
        validate_session_id(session_id)?;
        let dir = self.session_dir(session_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

//! Atomic JSON file persistence shared by the file-backed stores.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Temporary file suffix for atomic writes.
const TMP_SUFFIX: &str = ".tmp";

/// Lock file suffix for concurrent access prevention.
const LOCK_SUFFIX: &str = ".lock";

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

/// Exclusive advisory lock on a file, released when dropped.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until the lock on `path` is ours, creating the file if needed.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;
        FileExt::lock_exclusive(&file)
            .with_context(|| format!("Failed to acquire lock on {}", path.display()))?;
        debug!("Locked {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Hold an exclusive lock on the lock file next to `path` while `f` runs.
pub fn with_exclusive_lock<T>(path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let _lock = FileLock::acquire(&sibling(path, LOCK_SUFFIX))?;
    f()
}

/// Write `value` as pretty JSON via a temporary file and rename.
///
/// Callers that need read-modify-write atomicity wrap the whole sequence in
/// [`with_exclusive_lock`].
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let tmp_path = sibling(path, TMP_SUFFIX);
    let json = serde_json::to_string_pretty(value).context("Failed to serialize state")?;

    let mut tmp_file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
    tmp_file.write_all(json.as_bytes())?;
    tmp_file.sync_all()?;

    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to move state into {}", path.display()))?;
    Ok(())
}

/// Read JSON from `path`.
///
/// A missing file yields `Ok(None)`. A file that does not parse is an
/// error; it is left on disk untouched for inspection.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to open {}", path.display())),
    };

    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let value = serde_json::from_str(&contents)
        .with_context(|| format!("Corrupted state file at {}", path.display()))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/state.json");
        let mut value = BTreeMap::new();
        value.insert("a".to_string(), 1u32);

        save_json(&path, &value).unwrap();
        let loaded: Option<BTreeMap<String, u32>> = load_json(&path).unwrap();
        assert_eq!(loaded, Some(value));
    }

    #[test]
    fn test_no_tmp_file_after_save() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");
        save_json(&path, &vec![1, 2, 3]).unwrap();
        assert!(!temp.path().join("state.json.tmp").exists());
    }

    #[test]
    fn test_load_missing_is_none() {
        let temp = TempDir::new().unwrap();
        let loaded: Option<Vec<u32>> = load_json(&temp.path().join("missing.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_corrupted_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        let err = load_json::<Vec<u32>>(&path).unwrap_err();
        assert!(err.to_string().contains("Corrupted state file"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn test_with_exclusive_lock_runs_closure() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("dir/state.json");
        let out = with_exclusive_lock(&path, || Ok(7)).unwrap();
        assert_eq!(out, 7);
        assert!(temp.path().join("dir/state.json.lock").exists());
    }

    #[test]
    fn test_file_lock_excludes_other_handles_until_dropped() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state/store.lock");
        let lock = FileLock::acquire(&path).unwrap();
        assert_eq!(lock.path(), path.as_path());

        let other = File::open(&path).unwrap();
        assert!(FileExt::try_lock_exclusive(&other).is_err());

        drop(lock);
        assert!(FileExt::try_lock_exclusive(&other).is_ok());
        FileExt::unlock(&other).unwrap();
    }
}

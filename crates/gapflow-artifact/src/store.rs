//! The artifact store: one [`ScopedDir`] rooted at the artifact directory,
//! plus run layout, crash-lock files and the `latest.json` pointer.

use crate::error::StoreError;
use crate::layout::{RunLayout, LATEST_FILE, RUNS_DIR};
use crate::schema::{decode_versioned, Versioned};
use crate::scoped::{ScopedDir, DEFAULT_MAX_READ_BYTES};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Store tuning, embedded in the pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Reads above this size are refused
    pub max_read_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
        }
    }
}

/// Content of `run.lock`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLock {
    pub run_id: String,
    pub locked_at: DateTime<Utc>,
    pub pid: u32,
}

/// Content of `latest.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestPointer {
    pub schema_version: u32,
    pub run_id: String,
    pub updated_at: DateTime<Utc>,
}

impl Versioned for LatestPointer {
    const SCHEMA: &'static str = "latest";
    const VERSION: u32 = 1;
}

/// Durable run storage rooted at a fixed artifact directory
#[derive(Debug)]
pub struct ArtifactStore {
    dir: ScopedDir,
    /// Serializes read-modify-write cycles per file within this process
    file_locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl ArtifactStore {
    #[must_use]
    pub fn open(root: impl AsRef<Path>, config: &StoreConfig) -> Self {
        Self {
            dir: ScopedDir::new(root).with_max_read_bytes(config.max_read_bytes),
            file_locks: DashMap::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.root()
    }

    /// The underlying scoped filesystem
    #[inline]
    #[must_use]
    pub fn scoped(&self) -> &ScopedDir {
        &self.dir
    }

    #[inline]
    #[must_use]
    pub fn layout(&self, run_id: &str) -> RunLayout {
        RunLayout::new(run_id)
    }

    /// Create the directory skeleton of a run
    ///
    /// # Errors
    /// Containment or I/O failure
    pub fn provision_run(&self, run_id: &str) -> Result<RunLayout, StoreError> {
        let layout = self.layout(run_id);
        for dir in layout.provisioned_dirs() {
            self.dir.create_dir_all(dir)?;
        }
        Ok(layout)
    }

    /// # Errors
    /// See [`ScopedDir::write_json_atomic`]
    #[inline]
    pub fn write_json<T: Serialize + ?Sized>(&self, path: impl AsRef<Path>, value: &T) -> Result<PathBuf, StoreError> {
        self.dir.write_json_atomic(path, value)
    }

    /// # Errors
    /// See [`ScopedDir::write_text_atomic`]
    #[inline]
    pub fn write_text(&self, path: impl AsRef<Path>, text: &str) -> Result<PathBuf, StoreError> {
        self.dir.write_text_atomic(path, text)
    }

    /// # Errors
    /// See [`ScopedDir::read_json_safe`]
    #[inline]
    pub fn read_json<T: DeserializeOwned>(&self, path: impl AsRef<Path>) -> Result<T, StoreError> {
        self.dir.read_json_safe(path)
    }

    /// # Errors
    /// See [`ScopedDir::read_text_safe`]
    #[inline]
    pub fn read_text(&self, path: impl AsRef<Path>) -> Result<String, StoreError> {
        self.dir.read_text_safe(path)
    }

    /// Read a versioned document, validating its schema version first
    ///
    /// # Errors
    /// I/O and JSON errors, or [`StoreError::SchemaMismatch`]
    pub fn read_versioned<T: Versioned>(&self, path: impl AsRef<Path>) -> Result<T, StoreError> {
        let path = path.as_ref();
        let value: serde_json::Value = self.dir.read_json_safe(path)?;
        decode_versioned(path, value)
    }

    #[inline]
    #[must_use]
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.dir.exists(path)
    }

    /// Read-modify-write a JSON document under a per-file lock. A missing
    /// file starts from `T::default()`; the closure's error aborts the write.
    ///
    /// # Errors
    /// Any error of the read, the closure, or the write
    pub fn update_json<T, R, E, F>(&self, path: impl AsRef<Path>, f: F) -> Result<R, E>
    where
        T: Serialize + DeserializeOwned + Default,
        E: From<StoreError>,
        F: FnOnce(&mut T) -> Result<R, E>,
    {
        let resolved = self.dir.resolve(path.as_ref())?;
        let lock = self
            .file_locks
            .entry(resolved.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();

        let mut doc = match self.dir.read_json_safe::<T>(&resolved) {
            Ok(doc) => doc,
            Err(e) if e.is_not_found() => T::default(),
            Err(e) => return Err(e.into()),
        };
        let out = f(&mut doc)?;
        self.dir.write_json_atomic(&resolved, &doc)?;
        Ok(out)
    }

    /// Write `run.lock` for a run
    ///
    /// # Errors
    /// Write failure
    pub fn create_lock(&self, run_id: &str) -> Result<RunLock, StoreError> {
        let lock = RunLock {
            run_id: run_id.to_string(),
            locked_at: Utc::now(),
            pid: std::process::id(),
        };
        self.dir.write_json_atomic(self.layout(run_id).lock(), &lock)?;
        tracing::debug!(run_id, "run lock created");
        Ok(lock)
    }

    /// Remove `run.lock`. Returns `false` if there was none.
    ///
    /// # Errors
    /// I/O failure
    pub fn remove_lock(&self, run_id: &str) -> Result<bool, StoreError> {
        let removed = self.dir.remove_file(self.layout(run_id).lock())?;
        if removed {
            tracing::debug!(run_id, "run lock removed");
        }
        Ok(removed)
    }

    #[must_use]
    pub fn is_locked(&self, run_id: &str) -> bool {
        self.dir.exists(self.layout(run_id).lock())
    }

    /// Lock record of a run, if it has one. An unreadable lock file still
    /// counts as a lock so crashed runs are never hidden.
    ///
    /// # Errors
    /// I/O failure other than absence
    pub fn read_lock(&self, run_id: &str) -> Result<Option<RunLock>, StoreError> {
        match self.dir.read_json_safe::<RunLock>(self.layout(run_id).lock()) {
            Ok(lock) => Ok(Some(lock)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(StoreError::InvalidJson { .. } | StoreError::InvalidDocument { .. }) => Ok(Some(RunLock {
                run_id: run_id.to_string(),
                locked_at: DateTime::<Utc>::default(),
                pid: 0,
            })),
            Err(e) => Err(e),
        }
    }

    /// Every run whose lock file is still present
    ///
    /// # Errors
    /// I/O failure while listing runs
    pub fn locked_runs(&self) -> Result<Vec<RunLock>, StoreError> {
        let mut out = Vec::new();
        for run_id in self.list_runs()? {
            if let Some(lock) = self.read_lock(&run_id)? {
                out.push(lock);
            }
        }
        Ok(out)
    }

    /// Point `latest.json` at `run_id`
    ///
    /// # Errors
    /// Write failure
    pub fn write_latest(&self, run_id: &str) -> Result<(), StoreError> {
        let pointer = LatestPointer {
            schema_version: LatestPointer::VERSION,
            run_id: run_id.to_string(),
            updated_at: Utc::now(),
        };
        self.dir.write_json_atomic(LATEST_FILE, &pointer)?;
        Ok(())
    }

    /// # Errors
    /// Read, JSON, or schema failure other than absence
    pub fn read_latest(&self) -> Result<Option<LatestPointer>, StoreError> {
        match self.read_versioned::<LatestPointer>(LATEST_FILE) {
            Ok(pointer) => Ok(Some(pointer)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Run ids present under `runs/`, sorted
    ///
    /// # Errors
    /// I/O failure
    pub fn list_runs(&self) -> Result<Vec<String>, StoreError> {
        let names = self.dir.list_dir(RUNS_DIR)?;
        Ok(names
            .into_iter()
            .filter(|name| self.dir.resolve(Path::new(RUNS_DIR).join(name)).map(|p| p.is_dir()).unwrap_or(false))
            .collect())
    }

    #[must_use]
    pub fn run_exists(&self, run_id: &str) -> bool {
        self.dir.exists(self.layout(run_id).dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path(), &StoreConfig::default());
        (dir, store)
    }

    #[test]
    fn provision_creates_skeleton() {
        let (dir, store) = store();
        let layout = store.provision_run("r1").unwrap();
        assert!(dir.path().join(layout.report_dir()).is_dir());
        assert!(dir.path().join(layout.snapshots_dir()).is_dir());
        assert_eq!(store.list_runs().unwrap(), vec!["r1".to_string()]);
    }

    #[test]
    fn lock_lifecycle() {
        let (_dir, store) = store();
        store.provision_run("r1").unwrap();
        store.provision_run("r2").unwrap();
        let lock = store.create_lock("r1").unwrap();
        assert_eq!(lock.pid, std::process::id());
        assert!(store.is_locked("r1"));
        assert!(!store.is_locked("r2"));

        let locked = store.locked_runs().unwrap();
        assert_eq!(locked.len(), 1);
        assert_eq!(locked[0].run_id, "r1");

        assert!(store.remove_lock("r1").unwrap());
        assert!(!store.remove_lock("r1").unwrap());
        assert!(store.locked_runs().unwrap().is_empty());
    }

    #[test]
    fn corrupt_lock_still_reported() {
        let (_dir, store) = store();
        store.provision_run("r1").unwrap();
        store.write_text(store.layout("r1").lock(), "garbage").unwrap();
        let locked = store.locked_runs().unwrap();
        assert_eq!(locked.len(), 1);
        assert_eq!(locked[0].pid, 0);
    }

    #[test]
    fn latest_pointer_roundtrip() {
        let (_dir, store) = store();
        assert!(store.read_latest().unwrap().is_none());
        store.write_latest("r9").unwrap();
        assert_eq!(store.read_latest().unwrap().unwrap().run_id, "r9");
    }

    #[test]
    fn latest_with_wrong_version_is_schema_mismatch() {
        let (_dir, store) = store();
        store
            .write_text(LATEST_FILE, r#"{"schemaVersion": 99, "runId": "x", "updatedAt": "2024-01-01T00:00:00Z"}"#)
            .unwrap();
        let err = store.read_latest().unwrap_err();
        assert!(matches!(err, StoreError::SchemaMismatch { found: Some(99), .. }));
    }

    #[test]
    fn update_json_starts_from_default_and_accumulates() {
        let (_dir, store) = store();
        for i in 0..3u32 {
            store
                .update_json::<Vec<u32>, _, StoreError, _>("counter.json", |v| {
                    v.push(i);
                    Ok(())
                })
                .unwrap();
        }
        let values: Vec<u32> = store.read_json("counter.json").unwrap();
        assert_eq!(values, vec![0, 1, 2]);
    }

    #[test]
    fn update_json_closure_error_skips_write() {
        let (_dir, store) = store();
        let result = store.update_json::<Vec<u32>, (), StoreError, _>("c.json", |_| {
            Err(StoreError::NotFound { path: PathBuf::from("boom") })
        });
        assert!(result.is_err());
        assert!(!store.exists("c.json"));
    }

    #[test]
    fn concurrent_updates_do_not_lose_writes() {
        let (_dir, store) = store();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .update_json::<Vec<u32>, _, StoreError, _>("shared.json", |v| {
                            v.push(i);
                            Ok(())
                        })
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let mut values: Vec<u32> = store.read_json("shared.json").unwrap();
        values.sort_unstable();
        assert_eq!(values, (0..8).collect::<Vec<_>>());
    }
}

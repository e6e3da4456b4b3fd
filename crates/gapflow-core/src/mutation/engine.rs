//! Snapshot-first apply and exact rollback of workspace files
//!
//! Every apply persists a [`Snapshot`] of each target before the first byte
//! of the workspace changes. Apply and rollback on the same run are
//! serialized through a per-run async mutex; the engine never rolls back on
//! its own, so both operations stay independently auditable in the mutation
//! log.

use super::preview::Preview;
use super::snapshot::{Snapshot, SnapshotFile, SNAPSHOT_SCHEMA_VERSION};
use crate::config::{PipelineConfig, RollbackConfig};
use crate::error::PipelineError;
use crate::events::{EventBus, RunEventKind};
use crate::policy::{ActionPolicy, SafeAction};
use crate::run::{MutationAction, MutationRecord, RunMeta};
use crate::types::{RunId, SnapshotId};
use chrono::Utc;
use dashmap::DashMap;
use gapflow_artifact::{ArtifactStore, ContentHash, ScopedDir, StoreError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use ulid::{Generator, Ulid};

/// Result of a successful apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub snapshot_id: SnapshotId,
    pub preview_id: String,
    pub files: Vec<PathBuf>,
}

/// Result of a successful rollback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackOutcome {
    pub rollback_id: String,
    pub snapshot_id: SnapshotId,
    /// Files whose state matches the snapshot after the call
    pub files_restored: usize,
    /// Files that already matched and were left untouched
    pub unchanged: usize,
}

pub struct MutationEngine {
    store: Arc<ArtifactStore>,
    events: Arc<EventBus>,
    policy: ActionPolicy,
    rollback: RollbackConfig,
    max_read_bytes: u64,
    run_locks: DashMap<RunId, Arc<Mutex<()>>>,
    ids: parking_lot::Mutex<Generator>,
}

impl std::fmt::Debug for MutationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationEngine")
            .field("root", &self.store.root())
            .field("rollback", &self.rollback)
            .finish_non_exhaustive()
    }
}

impl MutationEngine {
    #[must_use]
    pub fn new(store: Arc<ArtifactStore>, events: Arc<EventBus>, config: &PipelineConfig) -> Self {
        Self {
            store,
            events,
            policy: ActionPolicy::from(&config.policy),
            rollback: config.rollback.clone(),
            max_read_bytes: config.store.max_read_bytes,
            run_locks: DashMap::new(),
            ids: parking_lot::Mutex::new(Generator::new()),
        }
    }

    fn run_lock(&self, run_id: RunId) -> Arc<Mutex<()>> {
        self.run_locks.entry(run_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn next_snapshot_id(&self) -> SnapshotId {
        SnapshotId(self.ids.lock().generate().unwrap_or_else(|_| Ulid::new()))
    }

    fn workspace(&self, run_id: RunId) -> Result<ScopedDir, PipelineError> {
        let run = RunMeta::load_run(&self.store, run_id)?;
        Ok(ScopedDir::new(run.workspace_root)
            .with_max_read_bytes(self.max_read_bytes)
            .without_backups())
    }

    /// Apply a stored preview to the run's workspace.
    ///
    /// # Errors
    /// - [`PipelineError::ConfirmationRequired`] / [`PipelineError::PolicyViolation`]
    ///   before anything is read
    /// - [`PipelineError::PreviewMissing`] / [`PipelineError::PreviewEmpty`]
    /// - [`PipelineError::Store`] with a path traversal if any target leaves
    ///   the workspace; no file is touched in that case
    /// - [`PipelineError::ApplyValidation`] if post-apply checks fail; the
    ///   error carries the snapshot id to roll back
    pub async fn apply_preview(
        &self,
        run_id: RunId,
        preview_id: &str,
        confirmed: bool,
    ) -> Result<ApplyOutcome, PipelineError> {
        self.policy.check(&SafeAction::ApplyTestPreview { confirmed })?;
        let lock = self.run_lock(run_id);
        let _guard = lock.lock().await;

        let workspace = self.workspace(run_id)?;
        let preview = Preview::load(&self.store, run_id, preview_id)?;
        if preview.is_empty() {
            return Err(PipelineError::PreviewEmpty {
                run_id,
                preview_id: preview_id.to_string(),
            });
        }

        let mut targets = Vec::with_capacity(preview.files.len());
        for (target, content) in &preview.files {
            targets.push((workspace.resolve(target)?, content.as_str()));
        }

        let snapshot = self.capture(&workspace, run_id, preview_id, targets.iter().map(|(p, _)| p.as_path()))?;
        let snapshot_id = snapshot.snapshot_id;

        let mut applied = Vec::with_capacity(targets.len());
        let mut issues = Vec::new();
        for (path, content) in &targets {
            match workspace.write_text_atomic(path, content) {
                Ok(written) => applied.push(written),
                Err(e) => {
                    tracing::warn!(run_id = %run_id, path = %path.display(), err = %e, "apply write failed");
                    issues.push(e.to_string());
                }
            }
        }

        for file in &snapshot.files {
            if !file.file_path.is_file() {
                issues.push(format!("{}: missing after apply", file.file_path.display()));
            }
        }
        if applied.len() != snapshot.files.len() {
            issues.push(format!("applied {} of {} files", applied.len(), snapshot.files.len()));
        }
        if !issues.is_empty() {
            tracing::error!(run_id = %run_id, snapshot_id = %snapshot_id, issues = issues.len(), "apply validation failed");
            return Err(PipelineError::ApplyValidation {
                run_id,
                preview_id: preview_id.to_string(),
                snapshot_id,
                issues,
            });
        }

        RunMeta::update(&self.store, run_id, |meta| {
            meta.append(MutationAction::Apply {
                preview_id: preview_id.to_string(),
                snapshot_id,
                files: applied.len(),
                rollback_available: true,
            });
            Ok(())
        })?;
        tracing::info!(run_id = %run_id, snapshot_id = %snapshot_id, files = applied.len(), "preview applied");
        self.events.emit(
            run_id,
            RunEventKind::MutationApplied {
                snapshot_id,
                preview_id: preview_id.to_string(),
                files: applied.len(),
            },
        );
        Ok(ApplyOutcome {
            snapshot_id,
            preview_id: preview_id.to_string(),
            files: applied,
        })
    }

    fn capture<'a>(
        &self,
        workspace: &ScopedDir,
        run_id: RunId,
        preview_id: &str,
        paths: impl Iterator<Item = &'a Path>,
    ) -> Result<Snapshot, PipelineError> {
        let mut files = Vec::new();
        for path in paths {
            let original = match workspace.read_text_safe(path) {
                Ok(text) => Some(text),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            };
            files.push(SnapshotFile::capture(path.to_path_buf(), original));
        }
        let snapshot = Snapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            snapshot_id: self.next_snapshot_id(),
            run_id,
            preview_id: preview_id.to_string(),
            created_at: Utc::now(),
            files,
        };
        let layout = self.store.layout(&run_id.to_string());
        self.store
            .write_json(layout.snapshot(&snapshot.snapshot_id.to_string()), &snapshot)?;
        tracing::debug!(run_id = %run_id, snapshot_id = %snapshot.snapshot_id, files = snapshot.files.len(), "snapshot persisted");
        Ok(snapshot)
    }

    /// Read a snapshot, mapping damage to [`PipelineError::RollbackIntegrity`]
    ///
    /// # Errors
    /// [`PipelineError::SnapshotNotFound`] or [`PipelineError::RollbackIntegrity`]
    pub fn get_snapshot(&self, run_id: RunId, snapshot_id: SnapshotId) -> Result<Snapshot, PipelineError> {
        let layout = self.store.layout(&run_id.to_string());
        match self.store.read_versioned::<Snapshot>(layout.snapshot(&snapshot_id.to_string())) {
            Ok(snapshot) => Ok(snapshot),
            Err(e) if e.is_not_found() => Err(PipelineError::SnapshotNotFound {
                run_id,
                snapshot_id: snapshot_id.to_string(),
            }),
            Err(
                e @ (StoreError::InvalidJson { .. }
                | StoreError::InvalidDocument { .. }
                | StoreError::SchemaMismatch { .. }),
            ) => Err(PipelineError::RollbackIntegrity {
                run_id,
                snapshot_id: snapshot_id.to_string(),
                issues: vec![e.to_string()],
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Restore every file of a snapshot.
    ///
    /// Files already matching the snapshot are skipped, so repeating a
    /// rollback is a no-op. Restores are not transactional across files: on
    /// failure, files restored so far stay restored.
    ///
    /// # Errors
    /// [`PipelineError::SnapshotNotFound`], [`PipelineError::StaleSnapshot`],
    /// or [`PipelineError::RollbackIntegrity`] listing every failed file
    pub async fn rollback(&self, snapshot_id: SnapshotId, run_id: RunId) -> Result<RollbackOutcome, PipelineError> {
        self.policy.check(&SafeAction::RollbackApply)?;
        let lock = self.run_lock(run_id);
        let _guard = lock.lock().await;

        let snapshot = self.get_snapshot(run_id, snapshot_id)?;
        let integrity = |issues: Vec<String>| PipelineError::RollbackIntegrity {
            run_id,
            snapshot_id: snapshot_id.to_string(),
            issues,
        };
        let issues = snapshot.integrity_issues(snapshot_id, run_id);
        if !issues.is_empty() {
            return Err(integrity(issues));
        }
        let age_days = snapshot.age_days(Utc::now());
        if age_days > i64::from(self.rollback.max_snapshot_age_days) {
            return Err(PipelineError::StaleSnapshot {
                snapshot_id,
                age_days,
                max_age_days: self.rollback.max_snapshot_age_days,
            });
        }

        let workspace = self.workspace(run_id)?;
        let mut resolved = Vec::with_capacity(snapshot.files.len());
        for file in &snapshot.files {
            resolved.push((workspace.resolve(&file.file_path)?, file));
        }

        let mut issues = Vec::new();
        let mut unchanged = 0;
        for (path, file) in &resolved {
            match restore(&workspace, path, file) {
                Ok(true) => {}
                Ok(false) => unchanged += 1,
                Err(e) => issues.push(format!("{}: {e}", path.display())),
            }
        }
        for (path, file) in &resolved {
            if let Some(problem) = verify_restored(&workspace, path, file) {
                issues.push(problem);
            }
        }
        if !issues.is_empty() {
            tracing::error!(run_id = %run_id, snapshot_id = %snapshot_id, issues = issues.len(), "rollback verification failed");
            return Err(integrity(issues));
        }

        let rollback_id = uuid::Uuid::new_v4().to_string();
        let files_restored = resolved.len();
        RunMeta::update(&self.store, run_id, |meta| {
            meta.append(MutationAction::Rollback {
                rollback_id: rollback_id.clone(),
                snapshot_id,
                files_restored,
            });
            Ok(())
        })?;
        tracing::info!(run_id = %run_id, snapshot_id = %snapshot_id, files_restored, unchanged, "rollback complete");
        self.events.emit(run_id, RunEventKind::RolledBack { snapshot_id, files_restored });
        Ok(RollbackOutcome {
            rollback_id,
            snapshot_id,
            files_restored,
            unchanged,
        })
    }

    /// Roll back the most recently created snapshot of a run
    ///
    /// # Errors
    /// [`PipelineError::NoSnapshots`] or any error of [`MutationEngine::rollback`]
    pub async fn rollback_latest(&self, run_id: RunId) -> Result<RollbackOutcome, PipelineError> {
        let latest = self
            .snapshot_ids(run_id)?
            .into_iter()
            .next()
            .ok_or(PipelineError::NoSnapshots(run_id))?;
        self.rollback(latest, run_id).await
    }

    /// Snapshot ids present on disk, newest first, whether or not their
    /// record is readable. Ids come from a monotonic ULID generator, so
    /// id order is creation order.
    fn snapshot_ids(&self, run_id: RunId) -> Result<Vec<SnapshotId>, PipelineError> {
        let layout = self.store.layout(&run_id.to_string());
        let mut ids: Vec<SnapshotId> = self
            .store
            .scoped()
            .list_dir(layout.snapshots_dir())?
            .iter()
            .filter_map(|name| name.parse::<Ulid>().ok().map(SnapshotId))
            .collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    /// Readable snapshots of a run, newest first. Unreadable entries are
    /// skipped with a warning.
    ///
    /// # Errors
    /// I/O failure listing the snapshot directory
    pub fn list_snapshots(&self, run_id: RunId) -> Result<Vec<Snapshot>, PipelineError> {
        let mut snapshots = Vec::new();
        for id in self.snapshot_ids(run_id)? {
            match self.get_snapshot(run_id, id) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => tracing::warn!(run_id = %run_id, snapshot_id = %id, err = %e, "skipping unreadable snapshot"),
            }
        }
        snapshots.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.snapshot_id.cmp(&a.snapshot_id))
        });
        Ok(snapshots)
    }

    /// True if the snapshot exists, is intact and is fresh enough
    #[must_use]
    pub fn is_rollback_available(&self, run_id: RunId, snapshot_id: SnapshotId) -> bool {
        self.get_snapshot(run_id, snapshot_id).is_ok_and(|s| {
            s.integrity_issues(snapshot_id, run_id).is_empty()
                && s.age_days(Utc::now()) <= i64::from(self.rollback.max_snapshot_age_days)
        })
    }

    /// Explicit cleanup. Returns `false` if the snapshot did not exist.
    ///
    /// # Errors
    /// I/O failure
    pub async fn delete_snapshot(&self, run_id: RunId, snapshot_id: SnapshotId) -> Result<bool, PipelineError> {
        let lock = self.run_lock(run_id);
        let _guard = lock.lock().await;
        let layout = self.store.layout(&run_id.to_string());
        let removed = self
            .store
            .scoped()
            .remove_dir_all(layout.snapshot_dir(&snapshot_id.to_string()))?;
        if removed {
            tracing::info!(run_id = %run_id, snapshot_id = %snapshot_id, "snapshot deleted");
        }
        Ok(removed)
    }

    /// Mutation log entries of a run
    ///
    /// # Errors
    /// [`PipelineError::RunNotFound`] or store errors
    pub fn mutation_log(&self, run_id: RunId) -> Result<Vec<MutationRecord>, PipelineError> {
        Ok(RunMeta::load(&self.store, run_id)?.mutations)
    }

    /// Check the hash chain of a run's mutation log
    ///
    /// # Errors
    /// [`PipelineError::LogIntegrity`] with the first bad index
    pub fn verify_log(&self, run_id: RunId) -> Result<usize, PipelineError> {
        let meta = RunMeta::load(&self.store, run_id)?;
        meta.verify_chain()
            .map_err(|index| PipelineError::LogIntegrity { run_id, index })?;
        Ok(meta.mutations.len())
    }
}

/// Bring one file back to its snapshot state. Returns whether anything changed.
fn restore(workspace: &ScopedDir, path: &Path, file: &SnapshotFile) -> Result<bool, StoreError> {
    if !file.existed_before() {
        return workspace.remove_file(path);
    }
    match workspace.read_bytes_safe(path) {
        Ok(current) if ContentHash::compute(&current) == file.hash => return Ok(false),
        Ok(_) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }
    workspace.write_text_atomic(path, &file.original_content)?;
    Ok(true)
}

fn verify_restored(workspace: &ScopedDir, path: &Path, file: &SnapshotFile) -> Option<String> {
    if !file.existed_before() {
        return path
            .exists()
            .then(|| format!("{}: should not exist after rollback", path.display()));
    }
    match workspace.read_bytes_safe(path) {
        Ok(bytes) if ContentHash::compute(&bytes) == file.hash => None,
        Ok(_) => Some(format!("{}: hash mismatch after rollback", path.display())),
        Err(e) => Some(format!("{}: {e}", path.display())),
    }
}

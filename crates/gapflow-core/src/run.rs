//! The Run entity and its persisted metadata record (`meta.json`)

use crate::config::RunConfig;
use crate::error::{ErrorSeverity, PipelineError};
use crate::state::RunState;
use crate::types::{RunId, SnapshotId};
use chrono::{DateTime, Utc};
use gapflow_artifact::{ArtifactStore, ContentHash, Versioned};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

pub const META_SCHEMA_VERSION: u32 = 1;

/// One entry of a run's state history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: RunState,
    pub to: RunState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunErrorSeverity {
    Warning,
    Error,
    Fatal,
}

impl From<ErrorSeverity> for RunErrorSeverity {
    fn from(value: ErrorSeverity) -> Self {
        match value {
            ErrorSeverity::Info | ErrorSeverity::Warn => Self::Warning,
            ErrorSeverity::Error => Self::Error,
            ErrorSeverity::Critical => Self::Fatal,
        }
    }
}

impl From<RunErrorSeverity> for ErrorSeverity {
    fn from(value: RunErrorSeverity) -> Self {
        match value {
            RunErrorSeverity::Warning => Self::Warn,
            RunErrorSeverity::Error => Self::Error,
            RunErrorSeverity::Fatal => Self::Critical,
        }
    }
}

/// Error recorded on a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    pub error_id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: RunErrorSeverity,
    /// State the run was in when the error occurred
    pub stage: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl RunError {
    #[must_use]
    pub fn new(stage: RunState, severity: RunErrorSeverity, message: impl Into<String>) -> Self {
        Self {
            error_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            severity,
            stage,
            code: None,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn from_pipeline(stage: RunState, severity: RunErrorSeverity, err: &PipelineError) -> Self {
        let mut record = Self::new(stage, severity, err.to_string());
        record.code = Some(err.code().to_string());
        record.context = err.context();
        record
    }

    #[must_use]
    pub fn with_context(mut self, context: BTreeMap<String, String>) -> Self {
        self.context.extend(context);
        self
    }
}

/// The unit of orchestration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: RunId,
    pub workspace_root: PathBuf,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    pub history: Vec<Transition>,
    pub config: RunConfig,
    #[serde(default)]
    pub errors: Vec<RunError>,
}

impl Run {
    /// New run in IDLE with the initial IDLE -> IDLE record
    #[must_use]
    pub fn new(id: RunId, workspace_root: PathBuf, config: RunConfig) -> Self {
        let now = Utc::now();
        Self {
            id,
            workspace_root,
            state: RunState::Idle,
            started_at: now,
            ended_at: None,
            duration_ms: None,
            history: vec![Transition {
                from: RunState::Idle,
                to: RunState::Idle,
                at: now,
            }],
            config,
            errors: Vec::new(),
        }
    }

    /// Record a transition. Callers validate against the table first.
    pub(crate) fn push_transition(&mut self, to: RunState) -> Transition {
        let record = Transition {
            from: self.state,
            to,
            at: Utc::now(),
        };
        self.history.push(record.clone());
        self.state = to;
        if to.is_terminal() {
            self.finish(record.at);
        }
        record
    }

    fn finish(&mut self, at: DateTime<Utc>) {
        self.ended_at = Some(at);
        let elapsed = (at - self.started_at).num_milliseconds();
        self.duration_ms = Some(u64::try_from(elapsed).unwrap_or(0));
    }

    #[must_use]
    pub fn last_transition(&self) -> Option<&Transition> {
        self.history.last()
    }

    #[must_use]
    pub fn has_fatal_error(&self) -> bool {
        self.errors.iter().any(|e| e.severity == RunErrorSeverity::Fatal)
    }
}

/// Payload of a mutation log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum MutationAction {
    Apply {
        preview_id: String,
        snapshot_id: SnapshotId,
        files: usize,
        rollback_available: bool,
    },
    Rollback {
        rollback_id: String,
        snapshot_id: SnapshotId,
        files_restored: usize,
    },
}

impl MutationAction {
    #[must_use]
    pub const fn snapshot_id(&self) -> SnapshotId {
        match self {
            Self::Apply { snapshot_id, .. } | Self::Rollback { snapshot_id, .. } => *snapshot_id,
        }
    }

    fn hash_fields(&self) -> Vec<String> {
        match self {
            Self::Apply {
                preview_id,
                snapshot_id,
                files,
                rollback_available,
            } => vec![
                "apply".into(),
                preview_id.clone(),
                snapshot_id.to_string(),
                files.to_string(),
                rollback_available.to_string(),
            ],
            Self::Rollback {
                rollback_id,
                snapshot_id,
                files_restored,
            } => vec![
                "rollback".into(),
                rollback_id.clone(),
                snapshot_id.to_string(),
                files_restored.to_string(),
            ],
        }
    }
}

/// Append-only, hash-chained mutation log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRecord {
    pub sequence: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub action: MutationAction,
    pub prev_hash: ContentHash,
    pub hash: ContentHash,
}

impl MutationRecord {
    fn compute_hash(sequence: u64, at: &DateTime<Utc>, action: &MutationAction, prev: &ContentHash) -> ContentHash {
        let mut fields = vec![sequence.to_string(), at.to_rfc3339()];
        fields.extend(action.hash_fields());
        fields.push(prev.to_hex());
        ContentHash::compute_fields(fields)
    }

    #[must_use]
    pub fn verify_hash(&self) -> bool {
        Self::compute_hash(self.sequence, &self.at, &self.action, &self.prev_hash) == self.hash
    }
}

/// Content of `runs/<id>/meta.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMeta {
    pub schema_version: u32,
    #[serde(default)]
    pub run: Option<Run>,
    #[serde(default)]
    pub mutations: Vec<MutationRecord>,
}

impl Default for RunMeta {
    fn default() -> Self {
        Self {
            schema_version: META_SCHEMA_VERSION,
            run: None,
            mutations: Vec::new(),
        }
    }
}

impl Versioned for RunMeta {
    const SCHEMA: &'static str = "meta";
    const VERSION: u32 = META_SCHEMA_VERSION;
}

impl RunMeta {
    /// Read `meta.json` of a run
    ///
    /// # Errors
    /// [`PipelineError::RunNotFound`] if absent, store errors otherwise
    pub fn load(store: &ArtifactStore, run_id: RunId) -> Result<Self, PipelineError> {
        match store.read_versioned::<Self>(store.layout(&run_id.to_string()).meta()) {
            Ok(meta) => Ok(meta),
            Err(e) if e.is_not_found() => Err(PipelineError::RunNotFound(run_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Serialized read-modify-write of `meta.json`
    ///
    /// # Errors
    /// Store errors or the closure's error
    pub fn update<R>(
        store: &ArtifactStore,
        run_id: RunId,
        f: impl FnOnce(&mut Self) -> Result<R, PipelineError>,
    ) -> Result<R, PipelineError> {
        store.update_json(store.layout(&run_id.to_string()).meta(), f)
    }

    /// Run record, or [`PipelineError::RunNotFound`] if the meta has none
    ///
    /// # Errors
    /// See [`RunMeta::load`]
    pub fn load_run(store: &ArtifactStore, run_id: RunId) -> Result<Run, PipelineError> {
        Self::load(store, run_id)?.run.ok_or(PipelineError::RunNotFound(run_id))
    }

    /// Append an entry linked to the previous one
    pub fn append(&mut self, action: MutationAction) -> &MutationRecord {
        let prev_hash = self.mutations.last().map_or(ContentHash::ZERO, |r| r.hash);
        let sequence = self.mutations.len() as u64;
        let at = Utc::now();
        let hash = MutationRecord::compute_hash(sequence, &at, &action, &prev_hash);
        self.mutations.push(MutationRecord {
            sequence,
            at,
            action,
            prev_hash,
            hash,
        });
        &self.mutations[self.mutations.len() - 1]
    }

    /// Check sequence numbers, links and hashes.
    ///
    /// # Errors
    /// Index of the first entry that does not verify
    pub fn verify_chain(&self) -> Result<(), usize> {
        let mut prev = ContentHash::ZERO;
        for (index, record) in self.mutations.iter().enumerate() {
            if record.sequence != index as u64 || record.prev_hash != prev || !record.verify_hash() {
                return Err(index);
            }
            prev = record.hash;
        }
        Ok(())
    }

    /// Most recent log entry for a snapshot
    #[must_use]
    pub fn last_for_snapshot(&self, snapshot_id: SnapshotId) -> Option<&MutationRecord> {
        self.mutations.iter().rev().find(|r| r.action.snapshot_id() == snapshot_id)
    }
}

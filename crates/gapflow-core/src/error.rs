//! Error types for gapflow Core
//!
//! [`PipelineError`] is the single error kind enum of the core. Callers branch
//! on the variant (or on [`PipelineError::code`]) instead of matching message
//! text, and every variant carries the run, path or id it concerns.

use crate::state::RunState;
use crate::types::{RunId, SnapshotId};
use chrono::{DateTime, Utc};
use gapflow_artifact::StoreError;
use gapflow_graph::DeltaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Operator-facing severity of an error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorSeverity {
    Info,
    Warn,
    Error,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        })
    }
}

/// Main gapflow error type
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Artifact or workspace I/O failure
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("run {run_id}: invalid transition {from} -> {to} (allowed: {})", fmt_states(.allowed))]
    InvalidTransition {
        run_id: RunId,
        from: RunState,
        to: RunState,
        allowed: Vec<RunState>,
    },

    /// Another writer moved the run first
    #[error("run {run_id}: expected state {expected}, found {actual}")]
    StaleState {
        run_id: RunId,
        expected: RunState,
        actual: RunState,
    },

    #[error("run not found: {0}")]
    RunNotFound(RunId),

    #[error("run {run_id} is locked since {locked_at} (pid {pid})")]
    RunLocked {
        run_id: String,
        locked_at: DateTime<Utc>,
        pid: u32,
    },

    #[error("run {run_id} has corrupted artifacts: {reason}")]
    CorruptedRun { run_id: String, reason: String },

    #[error("preview {preview_id} not found for run {run_id}")]
    PreviewMissing { run_id: RunId, preview_id: String },

    #[error("preview {preview_id} of run {run_id} contains no files")]
    PreviewEmpty { run_id: RunId, preview_id: String },

    /// Apply completed with problems; the snapshot can be rolled back
    #[error("apply of preview {preview_id} failed validation (snapshot {snapshot_id}): {}", .issues.join("; "))]
    ApplyValidation {
        run_id: RunId,
        preview_id: String,
        snapshot_id: SnapshotId,
        issues: Vec<String>,
    },

    #[error("rollback of snapshot {snapshot_id} failed: {}", .issues.join("; "))]
    RollbackIntegrity {
        run_id: RunId,
        snapshot_id: String,
        issues: Vec<String>,
    },

    #[error("snapshot {snapshot_id} not found for run {run_id}")]
    SnapshotNotFound { run_id: RunId, snapshot_id: String },

    #[error("snapshot {snapshot_id} is {age_days} days old (limit {max_age_days})")]
    StaleSnapshot {
        snapshot_id: SnapshotId,
        age_days: i64,
        max_age_days: u32,
    },

    #[error("run {0} has no snapshots")]
    NoSnapshots(RunId),

    #[error("execution setup failed for test {test_id}: {reason}")]
    ExecutionSetup { test_id: String, reason: String },

    #[error("policy violation for {action}: {reason}")]
    PolicyViolation { action: String, reason: String },

    #[error("{action} requires explicit user confirmation")]
    ConfirmationRequired { action: String },

    /// External scan/plan/generate/report collaborator failed
    #[error("{phase} collaborator failed: {message}")]
    Collaborator { phase: RunState, message: String },

    #[error("mutation log of run {run_id} is broken at entry {index}")]
    LogIntegrity { run_id: RunId, index: usize },

    #[error(transparent)]
    Delta(#[from] DeltaError),

    #[error("configuration error: {0}")]
    Config(String),
}

fn fmt_states(states: &[RunState]) -> String {
    if states.is_empty() {
        return "none".to_string();
    }
    states.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

impl PipelineError {
    /// Stable machine-readable code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Store(e) => e.code(),
            Self::InvalidTransition { .. } => "RUN_INVALID_TRANSITION",
            Self::StaleState { .. } => "RUN_STALE_STATE",
            Self::RunNotFound(_) => "RUN_NOT_FOUND",
            Self::RunLocked { .. } => "RUN_LOCKED",
            Self::CorruptedRun { .. } => "RUN_CORRUPTED",
            Self::PreviewMissing { .. } => "APPLY_PREVIEW_MISSING",
            Self::PreviewEmpty { .. } => "APPLY_PREVIEW_EMPTY",
            Self::ApplyValidation { .. } => "APPLY_VALIDATION_FAILED",
            Self::RollbackIntegrity { .. } => "ROLLBACK_INTEGRITY_FAILED",
            Self::SnapshotNotFound { .. } | Self::NoSnapshots(_) => "ROLLBACK_SNAPSHOT_NOT_FOUND",
            Self::StaleSnapshot { .. } => "ROLLBACK_SNAPSHOT_STALE",
            Self::ExecutionSetup { .. } => "EXEC_SETUP_FAILED",
            Self::PolicyViolation { .. } => "POLICY_VIOLATION",
            Self::ConfirmationRequired { .. } => "POLICY_CONFIRMATION_REQUIRED",
            Self::Collaborator { .. } => "COLLABORATOR_FAILED",
            Self::LogIntegrity { .. } => "LOG_INTEGRITY_VIOLATION",
            Self::Delta(_) => "DELTA_INVALID",
            Self::Config(_) => "CONFIG_INVALID",
        }
    }

    /// Path traversal and policy violations are always critical.
    #[must_use]
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Store(StoreError::PathTraversal { .. } | StoreError::InvalidJson { .. })
            | Self::PolicyViolation { .. }
            | Self::ConfirmationRequired { .. }
            | Self::RollbackIntegrity { .. }
            | Self::LogIntegrity { .. } => ErrorSeverity::Critical,
            Self::RunLocked { .. } | Self::StaleSnapshot { .. } | Self::StaleState { .. } => ErrorSeverity::Warn,
            _ => ErrorSeverity::Error,
        }
    }

    /// Ordered guidance for the operator
    #[must_use]
    pub fn remediation(&self) -> Vec<&'static str> {
        match self {
            Self::Store(StoreError::PathTraversal { .. }) => vec![
                "Use paths inside the workspace or artifact directory",
                "Remove `..` segments and symlinks that leave the root",
            ],
            Self::Store(StoreError::PermissionDenied { .. }) => vec![
                "Check write permissions on the artifact directory",
                "Run `gapflow health` to verify folder writability",
            ],
            Self::Store(StoreError::InvalidJson { .. } | StoreError::InvalidDocument { .. }) => vec![
                "The artifact is corrupted; re-run the analysis to regenerate it",
                "Restore the `.bak` copy next to the file if one exists",
            ],
            Self::Store(StoreError::SchemaMismatch { .. }) => {
                vec!["The artifact was written by an incompatible version; re-run the analysis"]
            }
            Self::Store(_) => vec!["Check disk space and permissions, then retry"],
            Self::InvalidTransition { .. } | Self::StaleState { .. } => {
                vec!["Reload the run state and retry the operation"]
            }
            Self::RunNotFound(_) => vec!["List runs with `gapflow health` and check the run id"],
            Self::RunLocked { .. } => vec![
                "Wait for the active run to finish",
                "If the process crashed, run `gapflow recover`",
            ],
            Self::CorruptedRun { .. } => vec!["Re-run the analysis to regenerate the run artifacts"],
            Self::PreviewMissing { .. } | Self::PreviewEmpty { .. } => {
                vec!["Regenerate the test preview before applying"]
            }
            Self::ApplyValidation { .. } => vec![
                "Roll back the snapshot referenced in the error",
                "Inspect the workspace for files that could not be written",
            ],
            Self::RollbackIntegrity { .. } => vec![
                "Inspect the listed files manually",
                "Restore from version control if the snapshot is damaged",
            ],
            Self::SnapshotNotFound { .. } | Self::NoSnapshots(_) => {
                vec!["List snapshots for the run and pick an existing one"]
            }
            Self::StaleSnapshot { .. } => vec![
                "Restore from version control instead",
                "Raise `rollback.max_snapshot_age_days` if the snapshot is known good",
            ],
            Self::ExecutionSetup { .. } => vec![
                "Check that the test runner is installed and on PATH",
                "Test file paths may only contain letters, digits, `_`, `.`, `/` and `-`",
            ],
            Self::PolicyViolation { .. } => vec!["The action is not permitted by the configured policy"],
            Self::ConfirmationRequired { .. } => vec!["Review the preview and confirm the action explicitly"],
            Self::Collaborator { .. } => vec!["Check the collaborator logs and retry the run"],
            Self::LogIntegrity { .. } => vec!["The mutation log was modified outside gapflow; audit meta.json"],
            Self::Delta(_) => vec!["Re-run both analyses; the delta inputs disagree"],
            Self::Config(_) => vec!["Fix the configuration file and retry"],
        }
    }

    /// Nothing in the core retries automatically; this tells the caller
    /// whether a retry can plausibly succeed.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Write { .. } | StoreError::Read { .. })
                | Self::StaleState { .. }
                | Self::RunLocked { .. }
                | Self::Collaborator { .. }
                | Self::ExecutionSetup { .. }
        )
    }

    /// Structured key/value context for logs and run error records
    #[must_use]
    pub fn context(&self) -> BTreeMap<String, String> {
        let mut ctx = BTreeMap::new();
        ctx.insert("code".to_string(), self.code().to_string());
        let mut put = |k: &str, v: String| {
            ctx.insert(k.to_string(), v);
        };
        match self {
            Self::Store(e) => put("path", e.path().display().to_string()),
            Self::InvalidTransition { run_id, from, to, .. } => {
                put("runId", run_id.to_string());
                put("from", from.to_string());
                put("to", to.to_string());
            }
            Self::StaleState { run_id, expected, actual } => {
                put("runId", run_id.to_string());
                put("expected", expected.to_string());
                put("actual", actual.to_string());
            }
            Self::RunNotFound(run_id) | Self::NoSnapshots(run_id) | Self::LogIntegrity { run_id, .. } => {
                put("runId", run_id.to_string());
            }
            Self::RunLocked { run_id, .. } | Self::CorruptedRun { run_id, .. } => put("runId", run_id.clone()),
            Self::PreviewMissing { run_id, preview_id } | Self::PreviewEmpty { run_id, preview_id } => {
                put("runId", run_id.to_string());
                put("previewId", preview_id.clone());
            }
            Self::ApplyValidation { run_id, preview_id, snapshot_id, .. } => {
                put("runId", run_id.to_string());
                put("previewId", preview_id.clone());
                put("snapshotId", snapshot_id.to_string());
            }
            Self::RollbackIntegrity { run_id, snapshot_id, .. } | Self::SnapshotNotFound { run_id, snapshot_id } => {
                put("runId", run_id.to_string());
                put("snapshotId", snapshot_id.clone());
            }
            Self::StaleSnapshot { snapshot_id, .. } => put("snapshotId", snapshot_id.to_string()),
            Self::ExecutionSetup { test_id, .. } => put("testId", test_id.clone()),
            Self::PolicyViolation { action, .. } | Self::ConfirmationRequired { action } => {
                put("action", action.clone());
            }
            Self::Collaborator { phase, .. } => put("phase", phase.to_string()),
            Self::Delta(_) | Self::Config(_) => {}
        }
        ctx
    }
}

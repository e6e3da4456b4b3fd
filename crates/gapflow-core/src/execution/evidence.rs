//! Execution results, persisted evidence, and batch summaries

use super::command::{CommandSpec, TestEngine};
use crate::error::PipelineError;
use crate::types::RunId;
use chrono::{DateTime, Utc};
use gapflow_artifact::layout::{COVERAGE_FILE, EXECUTION_META_FILE, STDERR_FILE, STDOUT_FILE};
use gapflow_artifact::{ArtifactStore, Versioned};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub const EXECUTION_META_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Passed,
    Failed,
    /// Killed after exceeding the wall-clock limit
    Timeout,
    /// The test could not be run at all
    Error,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Error => "ERROR",
        })
    }
}

/// Outcome of one test invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub test_id: String,
    pub run_id: RunId,
    pub engine: TestEngine,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
    pub error: Option<String>,
}

impl ExecutionResult {
    /// ERROR result for a test that never started
    #[must_use]
    pub fn not_started(run_id: RunId, test_id: &str, engine: TestEngine, error: &PipelineError) -> Self {
        let now = Utc::now();
        Self {
            test_id: test_id.to_string(),
            run_id,
            engine,
            status: ExecutionStatus::Error,
            started_at: now,
            ended_at: now,
            duration_ms: 0,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            pid: None,
            error: Some(error.to_string()),
        }
    }
}

/// Content of `execution-meta.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMeta {
    pub schema_version: u32,
    pub test_id: String,
    pub run_id: RunId,
    pub engine: TestEngine,
    pub status: ExecutionStatus,
    pub command: Vec<String>,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Versioned for ExecutionMeta {
    const SCHEMA: &'static str = "execution-meta";
    const VERSION: u32 = EXECUTION_META_SCHEMA_VERSION;
}

impl ExecutionMeta {
    fn of(result: &ExecutionResult, command: Vec<String>) -> Self {
        Self {
            schema_version: EXECUTION_META_SCHEMA_VERSION,
            test_id: result.test_id.clone(),
            run_id: result.run_id,
            engine: result.engine,
            status: result.status,
            command,
            exit_code: result.exit_code,
            started_at: result.started_at,
            ended_at: result.ended_at,
            duration_ms: result.duration_ms,
            pid: result.pid,
            error: result.error.clone(),
        }
    }
}

/// Write stdout, stderr and metadata under `evidence/execution-<testId>/`.
/// Returns the written paths.
///
/// # Errors
/// Store write failure
pub fn write_evidence(
    store: &ArtifactStore,
    result: &ExecutionResult,
    command: &CommandSpec,
) -> Result<Vec<PathBuf>, PipelineError> {
    let dir = store.layout(&result.run_id.to_string()).evidence_dir(&result.test_id);
    let meta = ExecutionMeta::of(result, command.argv());
    let written = vec![
        store.write_text(dir.join(STDOUT_FILE), &result.stdout)?,
        store.write_text(dir.join(STDERR_FILE), &result.stderr)?,
        store.write_json(dir.join(EXECUTION_META_FILE), &meta)?,
    ];
    tracing::debug!(run_id = %result.run_id, test_id = %result.test_id, "evidence written");
    Ok(written)
}

/// Write only `execution-meta.json` for a request rejected before any
/// command was built. The caller must have checked that the test id is a
/// safe path component.
///
/// # Errors
/// Store write failure
pub fn write_rejection(store: &ArtifactStore, result: &ExecutionResult) -> Result<PathBuf, PipelineError> {
    let dir = store.layout(&result.run_id.to_string()).evidence_dir(&result.test_id);
    Ok(store.write_json(dir.join(EXECUTION_META_FILE), &ExecutionMeta::of(result, Vec::new()))?)
}

/// An optional evidence file that was found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceArtifact {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evidence {
    pub meta: ExecutionMeta,
    pub stdout: Option<EvidenceArtifact>,
    pub stderr: Option<EvidenceArtifact>,
    pub coverage: Option<EvidenceArtifact>,
}

/// Read evidence of one test. Each optional artifact is checked on its own;
/// a missing log does not fail the read.
///
/// # Errors
/// Missing or invalid `execution-meta.json`
pub fn read_evidence(store: &ArtifactStore, run_id: RunId, test_id: &str) -> Result<Evidence, PipelineError> {
    let dir = store.layout(&run_id.to_string()).evidence_dir(test_id);
    let meta = store.read_versioned::<ExecutionMeta>(dir.join(EXECUTION_META_FILE))?;
    let probe = |name: &str| {
        let path = store.scoped().resolve(dir.join(name)).ok()?;
        let size = std::fs::metadata(&path).ok().filter(std::fs::Metadata::is_file)?.len();
        Some(EvidenceArtifact { path, size })
    };
    Ok(Evidence {
        meta,
        stdout: probe(STDOUT_FILE),
        stderr: probe(STDERR_FILE),
        coverage: probe(COVERAGE_FILE),
    })
}

/// Aggregate counts over a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub timeout: usize,
    pub error: usize,
    pub avg_duration_ms: f64,
}

impl ExecutionSummary {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.total > 0 && self.passed == self.total
    }
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize(results: &[ExecutionResult]) -> ExecutionSummary {
    let mut summary = ExecutionSummary {
        total: results.len(),
        ..ExecutionSummary::default()
    };
    let mut total_ms = 0u64;
    for result in results {
        match result.status {
            ExecutionStatus::Passed => summary.passed += 1,
            ExecutionStatus::Failed => summary.failed += 1,
            ExecutionStatus::Timeout => summary.timeout += 1,
            ExecutionStatus::Error => summary.error += 1,
        }
        total_ms = total_ms.saturating_add(result.duration_ms);
    }
    if !results.is_empty() {
        summary.avg_duration_ms = total_ms as f64 / results.len() as f64;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use gapflow_artifact::StoreConfig;

    fn result(status: ExecutionStatus, duration_ms: u64) -> ExecutionResult {
        let now = Utc::now();
        ExecutionResult {
            test_id: "t1".into(),
            run_id: RunId::new(),
            engine: TestEngine::Shell,
            status,
            started_at: now,
            ended_at: now,
            duration_ms,
            stdout: "out".into(),
            stderr: String::new(),
            exit_code: Some(0),
            pid: None,
            error: None,
        }
    }

    #[test]
    fn summary_counts() {
        let summary = summarize(&[
            result(ExecutionStatus::Passed, 10),
            result(ExecutionStatus::Failed, 20),
            result(ExecutionStatus::Timeout, 30),
        ]);
        assert_eq!((summary.passed, summary.failed, summary.timeout, summary.error), (1, 1, 1, 0));
        assert!((summary.avg_duration_ms - 20.0).abs() < f64::EPSILON);
        assert!(!summary.all_passed());
        assert!(summarize(&[]).avg_duration_ms.abs() < f64::EPSILON);
    }

    #[test]
    fn evidence_presence_is_checked_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path(), &StoreConfig::default());
        let result = result(ExecutionStatus::Passed, 5);
        write_evidence(&store, &result, &TestEngine::Shell.command("t.sh")).unwrap();

        let evidence = read_evidence(&store, result.run_id, "t1").unwrap();
        assert_eq!(evidence.meta.command, vec!["sh", "t.sh"]);
        assert_eq!(evidence.stdout.as_ref().map(|a| a.size), Some(3));
        assert_eq!(evidence.stderr.as_ref().map(|a| a.size), Some(0));
        assert!(evidence.coverage.is_none());

        let stdout = evidence.stdout.unwrap().path;
        std::fs::remove_file(stdout).unwrap();
        let evidence = read_evidence(&store, result.run_id, "t1").unwrap();
        assert!(evidence.stdout.is_none());
        assert!(evidence.stderr.is_some());
    }
}

//! Artifact-directory health checks and crash recovery

use crate::error::{ErrorSeverity, PipelineError};
use crate::run::{RunError, RunErrorSeverity, RunMeta};
use crate::state::RunState;
use crate::types::RunId;
use chrono::{DateTime, Utc};
use gapflow_artifact::layout::LATEST_FILE;
use gapflow_artifact::{ArtifactStore, LatestPointer, StoreError, Versioned};
use gapflow_graph::{Graph, Report, ScanResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

const PROBE_FILE: &str = ".health-probe";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub severity: ErrorSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remediation: Vec<String>,
}

impl HealthCheck {
    fn pass(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: HealthStatus::Pass,
            severity: ErrorSeverity::Info,
            message: message.into(),
            remediation: Vec::new(),
        }
    }

    fn problem(name: &str, status: HealthStatus, severity: ErrorSeverity, message: impl Into<String>, remediation: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            status,
            severity,
            message: message.into(),
            remediation: remediation.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub checks: Vec<HealthCheck>,
    pub summary: String,
    /// Remediation of every non-passing check, first occurrence kept
    pub remediation: Vec<String>,
}

/// A run touched by [`HealthService::recover_locked_runs`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredRun {
    pub run_id: String,
    pub previous_state: Option<RunState>,
    pub new_state: Option<RunState>,
}

#[derive(Debug, Clone)]
pub struct HealthService {
    store: Arc<ArtifactStore>,
}

impl HealthService {
    #[must_use]
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn run(&self) -> HealthReport {
        let checks = vec![
            self.check_writable(),
            self.check_locked_runs(),
            self.check_artifact_integrity(),
            self.check_latest_pointer(),
            self.check_json_validity(),
        ];
        let status = checks.iter().map(|c| c.status).max().unwrap_or(HealthStatus::Pass);

        let mut remediation: Vec<String> = Vec::new();
        for step in checks.iter().filter(|c| c.status != HealthStatus::Pass).flat_map(|c| &c.remediation) {
            if !remediation.contains(step) {
                remediation.push(step.clone());
            }
        }
        let count = |s: HealthStatus| checks.iter().filter(|c| c.status == s).count();
        let summary = format!(
            "{} checks passed, {} warnings, {} failures",
            count(HealthStatus::Pass),
            count(HealthStatus::Warn),
            count(HealthStatus::Fail)
        );
        tracing::info!(?status, %summary, "health check complete");
        HealthReport {
            status,
            checked_at: Utc::now(),
            checks,
            summary,
            remediation,
        }
    }

    fn check_writable(&self) -> HealthCheck {
        const NAME: &str = "folder_writable";
        let scoped = self.store.scoped();
        let probe = scoped
            .write_text_atomic(PROBE_FILE, &Utc::now().to_rfc3339())
            .and_then(|_| scoped.remove_file(PROBE_FILE));
        match probe {
            Ok(_) => HealthCheck::pass(NAME, format!("{} is writable", self.store.root().display())),
            Err(e) => HealthCheck::problem(
                NAME,
                HealthStatus::Fail,
                ErrorSeverity::Critical,
                format!("artifact folder is not writable: {e}"),
                &[
                    "Ensure the artifact folder has read/write permissions",
                    "Check directory ownership of the artifact folder",
                ],
            ),
        }
    }

    fn check_locked_runs(&self) -> HealthCheck {
        const NAME: &str = "locked_runs";
        match self.store.locked_runs() {
            Ok(locks) if locks.is_empty() => HealthCheck::pass(NAME, "no locked runs"),
            Ok(locks) => {
                let ids: Vec<&str> = locks.iter().map(|l| l.run_id.as_str()).collect();
                HealthCheck::problem(
                    NAME,
                    HealthStatus::Warn,
                    ErrorSeverity::Warn,
                    format!("{} locked run(s), possibly crashed: {}", ids.len(), ids.join(", ")),
                    &[
                        "Run `gapflow recover` to clean up crashed runs",
                        "Or delete runs/<runId>/run.lock by hand",
                    ],
                )
            }
            Err(e) => HealthCheck::problem(
                NAME,
                HealthStatus::Fail,
                ErrorSeverity::Error,
                format!("cannot check for locked runs: {e}"),
                &[],
            ),
        }
    }

    /// A run that got past scanning must also have its graph and report
    fn check_artifact_integrity(&self) -> HealthCheck {
        const NAME: &str = "artifact_integrity";
        let runs = match self.store.list_runs() {
            Ok(runs) => runs,
            Err(e) => {
                return HealthCheck::problem(NAME, HealthStatus::Fail, ErrorSeverity::Error, format!("cannot list runs: {e}"), &[])
            }
        };
        let mut incomplete = Vec::new();
        for run_id in &runs {
            let layout = self.store.layout(run_id);
            if !self.store.exists(layout.scan()) {
                continue;
            }
            for required in [layout.graph(), layout.report()] {
                if !self.store.exists(&required) {
                    incomplete.push(format!("{}", required.display()));
                }
            }
        }
        if incomplete.is_empty() {
            HealthCheck::pass(NAME, format!("all {} runs have required artifacts", runs.len()))
        } else {
            HealthCheck::problem(
                NAME,
                HealthStatus::Warn,
                ErrorSeverity::Warn,
                format!("{} missing artifacts: {}", incomplete.len(), incomplete.join(", ")),
                &["Re-run the analysis to regenerate incomplete runs"],
            )
        }
    }

    fn check_latest_pointer(&self) -> HealthCheck {
        const NAME: &str = "latest_pointer";
        match self.store.read_latest() {
            Ok(None) => HealthCheck::problem(
                NAME,
                HealthStatus::Warn,
                ErrorSeverity::Warn,
                "no latest.json pointer (no runs completed yet)",
                &[],
            ),
            Ok(Some(latest)) if self.store.run_exists(&latest.run_id) => {
                HealthCheck::pass(NAME, format!("latest pointer is valid: {}", latest.run_id))
            }
            Ok(Some(latest)) => HealthCheck::problem(
                NAME,
                HealthStatus::Fail,
                ErrorSeverity::Critical,
                format!("latest pointer references missing run {}", latest.run_id),
                &["Re-run the analysis to rewrite latest.json"],
            ),
            Err(e) => HealthCheck::problem(
                NAME,
                HealthStatus::Fail,
                ErrorSeverity::Error,
                format!("cannot read latest.json: {e}"),
                &["Delete latest.json and re-run the analysis"],
            ),
        }
    }

    fn check_json_validity(&self) -> HealthCheck {
        const NAME: &str = "json_validity";
        let runs = match self.store.list_runs() {
            Ok(runs) => runs,
            Err(e) => {
                return HealthCheck::problem(NAME, HealthStatus::Fail, ErrorSeverity::Error, format!("cannot list runs: {e}"), &[])
            }
        };
        let mut invalid = Vec::new();
        for run_id in &runs {
            let layout = self.store.layout(run_id);
            let results = [
                self.probe::<ScanResult>(&layout.scan()),
                self.probe::<Graph>(&layout.graph()),
                self.probe::<Report>(&layout.report()),
                self.probe::<RunMeta>(&layout.meta()),
            ];
            invalid.extend(results.into_iter().flatten());
        }
        invalid.extend(self.probe::<LatestPointer>(Path::new(LATEST_FILE)));
        if invalid.is_empty() {
            HealthCheck::pass(NAME, "all JSON artifacts are valid")
        } else {
            HealthCheck::problem(
                NAME,
                HealthStatus::Fail,
                ErrorSeverity::Critical,
                format!("{} corrupted artifacts: {}", invalid.len(), invalid.join("; ")),
                &[
                    "Delete the corrupted run directory",
                    "Re-run the analysis to regenerate it",
                ],
            )
        }
    }

    /// `Some(reason)` if the file exists but does not decode
    fn probe<T: Versioned>(&self, path: &Path) -> Option<String> {
        match self.store.read_versioned::<T>(path) {
            Err(e) if !e.is_not_found() => Some(e.to_string()),
            _ => None,
        }
    }

    /// Remove stale `run.lock` files and fail any persisted run that was
    /// still in flight. Runs listed in `active` are left alone.
    ///
    /// # Errors
    /// Store failure while listing or rewriting runs
    pub fn recover_locked_runs(&self, active: &[RunId]) -> Result<Vec<RecoveredRun>, PipelineError> {
        let mut recovered = Vec::new();
        for lock in self.store.locked_runs()? {
            let parsed = lock.run_id.parse::<RunId>().ok();
            if parsed.is_some_and(|id| active.contains(&id)) {
                continue;
            }
            let mut entry = RecoveredRun {
                run_id: lock.run_id.clone(),
                previous_state: None,
                new_state: None,
            };
            let has_meta = parsed.is_some_and(|id| self.store.exists(self.store.layout(&id.to_string()).meta()));
            if let Some(run_id) = parsed.filter(|_| has_meta) {
                match RunMeta::update(&self.store, run_id, |meta| Ok(mark_recovered(meta, lock.locked_at))) {
                    Ok(states) => {
                        if let Some((from, to)) = states {
                            entry.previous_state = Some(from);
                            entry.new_state = Some(to);
                        }
                    }
                    Err(PipelineError::Store(
                        e @ (StoreError::InvalidJson { .. }
                        | StoreError::InvalidDocument { .. }
                        | StoreError::SchemaMismatch { .. }),
                    )) => {
                        tracing::warn!(run_id = %lock.run_id, err = %e, "meta.json unreadable; removing lock only");
                    }
                    Err(e) => return Err(e),
                }
            }
            self.store.remove_lock(&lock.run_id)?;
            tracing::info!(run_id = %entry.run_id, from = ?entry.previous_state, to = ?entry.new_state, "recovered locked run");
            recovered.push(entry);
        }
        Ok(recovered)
    }
}

/// Force a non-terminal run to FAILED (or CANCELLED where FAILED is not
/// reachable) and record why. Returns the transition made, if any.
fn mark_recovered(meta: &mut RunMeta, locked_at: DateTime<Utc>) -> Option<(RunState, RunState)> {
    let run = meta.run.as_mut()?;
    let from = run.state;
    if from.is_terminal() {
        return None;
    }
    let to = if from.can_transition_to(RunState::Failed) {
        RunState::Failed
    } else {
        RunState::Cancelled
    };
    let mut error = RunError::new(
        from,
        RunErrorSeverity::Error,
        format!("run was locked since {locked_at} and recovered after a crash"),
    );
    error.code = Some("RUN_RECOVERED".to_string());
    run.errors.push(error);
    run.push_transition(to);
    Some((from, to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::run::Run;
    use gapflow_artifact::StoreConfig;
    use std::path::PathBuf;

    fn store() -> (tempfile::TempDir, Arc<ArtifactStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::open(dir.path(), &StoreConfig::default()));
        (dir, store)
    }

    fn persist_run(store: &ArtifactStore, state: RunState) -> RunId {
        let id = RunId::new();
        let mut run = Run::new(id, PathBuf::from("/ws"), RunConfig::default());
        run.state = state;
        store.provision_run(&id.to_string()).unwrap();
        let meta = RunMeta {
            run: Some(run),
            ..RunMeta::default()
        };
        store.write_json(store.layout(&id.to_string()).meta(), &meta).unwrap();
        id
    }

    #[test]
    fn fresh_folder_only_warns_about_latest() {
        let (_dir, store) = store();
        let report = HealthService::new(store).run();
        assert_eq!(report.status, HealthStatus::Warn);
        let latest = report.checks.iter().find(|c| c.name == "latest_pointer").unwrap();
        assert_eq!(latest.status, HealthStatus::Warn);
    }

    #[test]
    fn corrupted_scan_fails_and_remediation_is_deduplicated() {
        let (_dir, store) = store();
        let a = persist_run(&store, RunState::Done);
        let b = persist_run(&store, RunState::Done);
        store.write_text(store.layout(&a.to_string()).scan(), "{broken").unwrap();
        store.write_text(store.layout(&b.to_string()).scan(), "{broken").unwrap();
        store.write_latest(&a.to_string()).unwrap();

        let report = HealthService::new(store).run();
        assert_eq!(report.status, HealthStatus::Fail);
        let mut unique = report.remediation.clone();
        unique.dedup();
        assert_eq!(unique, report.remediation);
    }

    #[test]
    fn locked_run_warns_and_recovery_fails_it() {
        let (_dir, store) = store();
        let id = persist_run(&store, RunState::Generating);
        store.create_lock(&id.to_string()).unwrap();
        let service = HealthService::new(Arc::clone(&store));

        let check = service.run().checks.into_iter().find(|c| c.name == "locked_runs").unwrap();
        assert_eq!(check.status, HealthStatus::Warn);

        let recovered = service.recover_locked_runs(&[]).unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].new_state, Some(RunState::Failed));
        assert!(!store.is_locked(&id.to_string()));

        let run = RunMeta::load_run(&store, id).unwrap();
        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.errors[0].code.as_deref(), Some("RUN_RECOVERED"));
    }

    #[test]
    fn idle_run_is_cancelled_and_active_runs_skipped() {
        let (_dir, store) = store();
        let idle = persist_run(&store, RunState::Idle);
        let active = persist_run(&store, RunState::Scanning);
        store.create_lock(&idle.to_string()).unwrap();
        store.create_lock(&active.to_string()).unwrap();

        let recovered = HealthService::new(Arc::clone(&store)).recover_locked_runs(&[active]).unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].new_state, Some(RunState::Cancelled));
        assert!(store.is_locked(&active.to_string()));
    }
}

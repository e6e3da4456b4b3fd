//! Run orchestrator
//!
//! Owns the in-memory run table and drives runs through the lifecycle:
//!
//! ```text
//! IDLE → SCANNING → PLANNING → GENERATING → APPLYING → EXECUTING → REPORTING → DONE
//!            └──────────┴───────────┴────────────┴───────────┴───────────┴→ FAILED | CANCELLED
//! ```
//!
//! Every transition is validated and persisted to `meta.json` under a per-run
//! mutex before the in-memory record changes, so a losing concurrent caller
//! sees an error and the table never disagrees with disk.

use crate::config::{PipelineConfig, RunConfig};
use crate::error::{ErrorSeverity, PipelineError};
use crate::events::{EventBus, RunEventKind};
use crate::execution::{ExecutionController, ExecutionRequest, ExecutionResult, TestEngine};
use crate::health::{HealthService, RecoveredRun};
use crate::mutation::{ApplyOutcome, MutationEngine, Preview};
use crate::policy::{ActionPolicy, SafeAction};
use crate::run::{Run, RunError, RunErrorSeverity, RunMeta, Transition};
use crate::state::RunState;
use crate::types::RunId;
use async_trait::async_trait;
use dashmap::DashMap;
use gapflow_artifact::{stable_id, ArtifactStore};
use gapflow_graph::{
    build_graph, build_report, compute_delta, validate_delta, DiagramIndex, DiagramRenderer, Graph, MermaidRenderer,
    Report, RunView, ScanResult,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// What a collaborator sees of the run it works for
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub workspace_root: PathBuf,
    pub config: RunConfig,
}

/// External phase implementations. Only `scan` is mandatory.
#[async_trait]
pub trait Collaborators: Send + Sync {
    /// Produce the raw scan of the workspace
    async fn scan(&self, ctx: &RunContext) -> anyhow::Result<ScanResult>;

    async fn plan(&self, _ctx: &RunContext, _report: &Report) -> anyhow::Result<()> {
        Ok(())
    }

    /// Generated files keyed by workspace-relative target path
    async fn generate(&self, _ctx: &RunContext, _report: &Report) -> anyhow::Result<Vec<Preview>> {
        Ok(Vec::new())
    }

    /// Tests to run during EXECUTING. Defaults to every generated file.
    fn tests(&self, _ctx: &RunContext, previews: &[Preview]) -> Vec<ExecutionRequest> {
        previews
            .iter()
            .flat_map(|p| p.files.keys())
            .map(|file| ExecutionRequest::new(stable_id(&[file.as_str()]), file.clone()))
            .collect()
    }

    async fn report(&self, _ctx: &RunContext, _report: &Report, _results: &[ExecutionResult]) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Outcome of [`RunOrchestrator::execute_run`]
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: RunId,
    /// DONE, or CANCELLED if the run was cancelled between phases
    pub state: RunState,
    pub duration_ms: u64,
    /// Paths relative to the artifact root
    pub artifacts: Vec<PathBuf>,
    pub coverage_ratio: f64,
    pub previews: Vec<String>,
    pub applied: Vec<ApplyOutcome>,
    pub results: Vec<ExecutionResult>,
}

impl RunSummary {
    fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            state: RunState::Idle,
            duration_ms: 0,
            artifacts: Vec::new(),
            coverage_ratio: 0.0,
            previews: Vec::new(),
            applied: Vec::new(),
            results: Vec::new(),
        }
    }
}

/// Owns the run table and wires the store, engines and collaborators together
pub struct RunOrchestrator {
    store: Arc<ArtifactStore>,
    events: Arc<EventBus>,
    collaborators: Arc<dyn Collaborators>,
    renderer: Box<dyn DiagramRenderer>,
    policy: ActionPolicy,
    mutation: MutationEngine,
    executor: ExecutionController,
    runs: DashMap<RunId, Arc<Mutex<Run>>>,
}

impl std::fmt::Debug for RunOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOrchestrator")
            .field("root", &self.store.root())
            .field("runs", &self.runs.len())
            .finish_non_exhaustive()
    }
}

impl RunOrchestrator {
    #[must_use]
    pub fn new(
        store: Arc<ArtifactStore>,
        events: Arc<EventBus>,
        collaborators: Arc<dyn Collaborators>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            mutation: MutationEngine::new(Arc::clone(&store), Arc::clone(&events), config),
            executor: ExecutionController::new(
                Arc::clone(&store),
                Arc::clone(&events),
                config.execution.clone(),
                config.store.max_read_bytes,
            ),
            policy: ActionPolicy::from(&config.policy),
            renderer: Box::new(MermaidRenderer::default()),
            runs: DashMap::new(),
            store,
            events,
            collaborators,
        }
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: impl DiagramRenderer + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self
    }

    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    #[inline]
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    #[inline]
    #[must_use]
    pub fn mutation(&self) -> &MutationEngine {
        &self.mutation
    }

    #[inline]
    #[must_use]
    pub fn executor(&self) -> &ExecutionController {
        &self.executor
    }

    /// Allocate a run in IDLE, provision its directories and persist it.
    ///
    /// # Errors
    /// Store failure while provisioning or writing `meta.json`
    pub fn create_run(&self, workspace_root: impl Into<PathBuf>, config: RunConfig) -> Result<Run, PipelineError> {
        let run = Run::new(RunId::new(), workspace_root.into(), config);
        self.store.provision_run(&run.id.to_string())?;
        persist(&self.store, &run)?;
        self.runs.insert(run.id, Arc::new(Mutex::new(run.clone())));
        tracing::info!(run_id = %run.id, workspace = %run.workspace_root.display(), "run created");
        self.events.emit(
            run.id,
            RunEventKind::Created {
                workspace_root: run.workspace_root.clone(),
            },
        );
        Ok(run)
    }

    /// Table entry for a run, loading it from `meta.json` on first access
    fn handle(&self, run_id: RunId) -> Result<Arc<Mutex<Run>>, PipelineError> {
        if let Some(entry) = self.runs.get(&run_id) {
            return Ok(Arc::clone(entry.value()));
        }
        let run = RunMeta::load_run(&self.store, run_id)?;
        Ok(Arc::clone(
            self.runs.entry(run_id).or_insert_with(|| Arc::new(Mutex::new(run))).value(),
        ))
    }

    /// Move a run to `to` if the transition table allows it.
    ///
    /// # Errors
    /// [`PipelineError::InvalidTransition`] with nothing recorded, or a store
    /// failure while persisting (the in-memory run is then unchanged)
    pub async fn transition_to(&self, run_id: RunId, to: RunState) -> Result<Transition, PipelineError> {
        let handle = self.handle(run_id)?;
        let mut run = handle.lock().await;
        self.apply_transition(&mut run, to)
    }

    /// Compare-and-set variant of [`Self::transition_to`]
    ///
    /// # Errors
    /// [`PipelineError::StaleState`] if the run is no longer in `expected`,
    /// otherwise as [`Self::transition_to`]
    pub async fn transition_from(
        &self,
        run_id: RunId,
        expected: RunState,
        to: RunState,
    ) -> Result<Transition, PipelineError> {
        let handle = self.handle(run_id)?;
        let mut run = handle.lock().await;
        if run.state != expected {
            return Err(PipelineError::StaleState {
                run_id,
                expected,
                actual: run.state,
            });
        }
        self.apply_transition(&mut run, to)
    }

    /// Validate, persist, then commit to memory and publish
    fn apply_transition(&self, run: &mut Run, to: RunState) -> Result<Transition, PipelineError> {
        let from = run.state;
        if !from.can_transition_to(to) {
            tracing::warn!(run_id = %run.id, %from, %to, "invalid transition rejected");
            return Err(PipelineError::InvalidTransition {
                run_id: run.id,
                from,
                to,
                allowed: from.allowed_transitions().to_vec(),
            });
        }
        let mut next = run.clone();
        let record = next.push_transition(to);
        persist(&self.store, &next)?;
        *run = next;
        tracing::info!(run_id = %run.id, %from, %to, "state changed");
        self.events.emit(run.id, RunEventKind::StateChanged { from, to });
        Ok(record)
    }

    /// Move to the next phase unless the run was cancelled meanwhile.
    /// Returns `false` on cancellation.
    async fn advance(&self, run_id: RunId, to: RunState) -> Result<bool, PipelineError> {
        let handle = self.handle(run_id)?;
        let mut run = handle.lock().await;
        if run.state == RunState::Cancelled {
            tracing::info!(run_id = %run_id, next = %to, "run cancelled; stopping");
            return Ok(false);
        }
        self.apply_transition(&mut run, to)?;
        Ok(true)
    }

    /// Drive a run from its current state (IDLE, or FAILED/CANCELLED for a
    /// retry) through every phase to DONE.
    ///
    /// # Errors
    /// Any phase failure, after it has been recorded on the run and the run
    /// forced to FAILED
    pub async fn execute_run(&self, run_id: RunId) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        match self.drive(run_id, started).await {
            Ok(summary) => Ok(summary),
            Err(err) => Err(self.handle_run_error(run_id, err).await),
        }
    }

    async fn drive(&self, run_id: RunId, started: Instant) -> Result<RunSummary, PipelineError> {
        let ctx = {
            let handle = self.handle(run_id)?;
            let run = handle.lock().await;
            RunContext {
                run_id,
                workspace_root: run.workspace_root.clone(),
                config: run.config.clone(),
            }
        };
        let mut summary = RunSummary::new(run_id);
        let key = run_id.to_string();

        self.policy.check(&SafeAction::Scan {
            workspace_folder: Some(ctx.workspace_root.clone()),
        })?;
        self.transition_to(run_id, RunState::Scanning).await?;
        self.store.create_lock(&key)?;
        self.events.emit(run_id, RunEventKind::ScanStarted);
        let scan = self
            .collaborators
            .scan(&ctx)
            .await
            .map_err(|e| collaborator(RunState::Scanning, &e))?;
        let (artifacts, report) = self.persist_scan_artifacts(run_id, &scan).await?;
        self.events.emit(
            run_id,
            RunEventKind::ScanComplete {
                artifacts: artifacts.clone(),
                endpoints: scan.endpoints.len(),
                calls: scan.api_calls.len(),
            },
        );
        summary.artifacts = artifacts;
        summary.coverage_ratio = report.summary.coverage_ratio;

        if !self.advance(run_id, RunState::Planning).await? {
            return Ok(cancelled(summary, started));
        }
        self.collaborators
            .plan(&ctx, &report)
            .await
            .map_err(|e| collaborator(RunState::Planning, &e))?;

        if !self.advance(run_id, RunState::Generating).await? {
            return Ok(cancelled(summary, started));
        }
        let mut previews = Vec::new();
        if ctx.config.generate_tests {
            self.policy.check(&SafeAction::GenerateTest { auto_apply: false })?;
            previews = self
                .collaborators
                .generate(&ctx, &report)
                .await
                .map_err(|e| collaborator(RunState::Generating, &e))?;
            for preview in &mut previews {
                preview.run_id = run_id;
                preview.save(&self.store)?;
            }
        }
        summary.previews = previews.iter().map(|p| p.preview_id.clone()).collect();

        if !self.advance(run_id, RunState::Applying).await? {
            return Ok(cancelled(summary, started));
        }
        if ctx.config.auto_apply {
            for preview in previews.iter().filter(|p| !p.is_empty()) {
                let outcome = self
                    .mutation
                    .apply_preview(run_id, &preview.preview_id, ctx.config.apply_confirmed)
                    .await?;
                summary.applied.push(outcome);
            }
        }

        if !self.advance(run_id, RunState::Executing).await? {
            return Ok(cancelled(summary, started));
        }
        if ctx.config.run_tests {
            self.policy.check(&SafeAction::ExecuteTests)?;
            let engine = ctx
                .config
                .frameworks
                .first()
                .copied()
                .unwrap_or(self.executor.config().default_engine);
            let requests: Vec<ExecutionRequest> = self
                .collaborators
                .tests(&ctx, &previews)
                .into_iter()
                .map(|r| with_defaults(r, engine, ctx.config.timeout_ms))
                .collect();
            summary.results = self.executor.execute_batch(run_id, &requests).await;
        }

        if !self.advance(run_id, RunState::Reporting).await? {
            return Ok(cancelled(summary, started));
        }
        self.collaborators
            .report(&ctx, &report, &summary.results)
            .await
            .map_err(|e| collaborator(RunState::Reporting, &e))?;

        if !self.advance(run_id, RunState::Done).await? {
            return Ok(cancelled(summary, started));
        }
        self.store.remove_lock(&key)?;
        summary.state = RunState::Done;
        summary.duration_ms = elapsed_ms(started);
        tracing::info!(run_id = %run_id, duration_ms = summary.duration_ms, "run complete");
        self.events.emit(
            run_id,
            RunEventKind::RunComplete {
                duration_ms: summary.duration_ms,
            },
        );
        Ok(summary)
    }

    /// Write the scan-boundary artifacts in order: scan, graph, report,
    /// diagrams and their index, delta against the previous latest run, and
    /// finally `latest.json`. Returns the written paths relative to the
    /// artifact root together with the report.
    ///
    /// `latest.json` is written under the run's lock and only if the run was
    /// not cancelled meanwhile.
    ///
    /// # Errors
    /// Unknown run, store failure, or a delta that fails validation
    pub async fn persist_scan_artifacts(
        &self,
        run_id: RunId,
        scan: &ScanResult,
    ) -> Result<(Vec<PathBuf>, Report), PipelineError> {
        let key = run_id.to_string();
        let layout = self.store.layout(&key);
        let previous = match self.store.read_latest() {
            Ok(latest) => latest.map(|l| l.run_id).filter(|id| *id != key),
            Err(e) => {
                tracing::warn!(run_id = %run_id, err = %e, "latest.json unreadable; skipping delta");
                None
            }
        };

        let graph = build_graph(scan);
        let report = build_report(&graph);
        let mut written = Vec::new();

        self.store.write_json(layout.scan(), scan)?;
        written.push(layout.scan());
        self.store.write_json(layout.graph(), &graph)?;
        written.push(layout.graph());
        self.store.write_json(layout.report(), &report)?;
        written.push(layout.report());

        let diagrams = self.renderer.render(&graph, &report);
        for diagram in &diagrams {
            let path = layout.diagram(&diagram.file_name());
            self.store.write_text(&path, &diagram.content)?;
            written.push(path);
        }
        self.store.write_json(layout.diagram_index(), &DiagramIndex::from_diagrams(&diagrams))?;
        written.push(layout.diagram_index());

        if let Some(prev) = previous {
            match self.load_view(&prev) {
                Ok((prev_graph, prev_report)) => {
                    let delta = compute_delta(
                        RunView {
                            run_id: &prev,
                            graph: &prev_graph,
                            report: &prev_report,
                        },
                        RunView {
                            run_id: &key,
                            graph: &graph,
                            report: &report,
                        },
                    );
                    validate_delta(&delta)?;
                    self.store.write_json(layout.delta(), &delta)?;
                    written.push(layout.delta());
                }
                Err(e) => tracing::warn!(run_id = %run_id, previous = %prev, err = %e, "previous run unreadable; skipping delta"),
            }
        }

        let handle = self.handle(run_id)?;
        let run = handle.lock().await;
        if run.state == RunState::Cancelled {
            tracing::info!(run_id = %run_id, "run cancelled during scan; latest.json left unchanged");
        } else {
            self.store.write_latest(&key)?;
            written.push(PathBuf::from(gapflow_artifact::layout::LATEST_FILE));
        }
        drop(run);
        tracing::debug!(run_id = %run_id, artifacts = written.len(), stats = ?graph.stats, "scan artifacts persisted");
        Ok((written, report))
    }

    fn load_view(&self, run_id: &str) -> Result<(Graph, Report), PipelineError> {
        let layout = self.store.layout(run_id);
        Ok((self.store.read_versioned(layout.graph())?, self.store.read_versioned(layout.report())?))
    }

    /// Record `err` on the run, force FAILED where the table allows it,
    /// release the lock and publish. Returns `err` for the caller to raise.
    pub async fn handle_run_error(&self, run_id: RunId, err: PipelineError) -> PipelineError {
        let severity = if err.severity() == ErrorSeverity::Critical || matches!(err, PipelineError::RunNotFound(_)) {
            RunErrorSeverity::Fatal
        } else {
            RunErrorSeverity::Error
        };
        tracing::error!(run_id = %run_id, code = err.code(), err = %err, "run failed");

        if let Ok(handle) = self.handle(run_id) {
            let mut run = handle.lock().await;
            let mut next = run.clone();
            let error = RunError::from_pipeline(next.state, severity, &err);
            let error_id = error.error_id.clone();
            next.errors.push(error);
            let from = next.state;
            let failed = from.can_transition_to(RunState::Failed);
            if failed {
                next.push_transition(RunState::Failed);
            }
            match persist(&self.store, &next) {
                Ok(()) => {
                    *run = next;
                    if failed {
                        self.events.emit(run_id, RunEventKind::StateChanged { from, to: RunState::Failed });
                    }
                }
                Err(e) => tracing::error!(run_id = %run_id, err = %e, "could not persist run failure"),
            }
            self.events.emit(
                run_id,
                RunEventKind::RunError {
                    error_id,
                    severity: err.severity(),
                    message: err.to_string(),
                },
            );
        }
        if let Err(e) = self.store.remove_lock(&run_id.to_string()) {
            tracing::warn!(run_id = %run_id, err = %e, "could not remove run lock");
        }
        err
    }

    /// Force CANCELLED unless the run already finished. Returns whether the
    /// run was cancelled by this call.
    ///
    /// # Errors
    /// Unknown run, or a store failure while persisting
    pub async fn cancel_run(&self, run_id: RunId) -> Result<bool, PipelineError> {
        let handle = self.handle(run_id)?;
        let mut run = handle.lock().await;
        if run.state.is_terminal() {
            tracing::debug!(run_id = %run_id, state = %run.state, "cancel ignored");
            return Ok(false);
        }
        self.apply_transition(&mut run, RunState::Cancelled)?;
        self.store.remove_lock(&run_id.to_string())?;
        Ok(true)
    }

    /// Record a non-fatal problem without changing state
    ///
    /// # Errors
    /// Unknown run, or a store failure while persisting
    pub async fn record_error(
        &self,
        run_id: RunId,
        message: impl Into<String>,
        severity: RunErrorSeverity,
        context: BTreeMap<String, String>,
    ) -> Result<RunError, PipelineError> {
        let handle = self.handle(run_id)?;
        let mut run = handle.lock().await;
        let error = RunError::new(run.state, severity, message).with_context(context);
        let mut next = run.clone();
        next.errors.push(error.clone());
        persist(&self.store, &next)?;
        *run = next;
        tracing::warn!(run_id = %run_id, stage = %error.stage, severity = ?error.severity, message = %error.message, "run error recorded");
        self.events.emit(
            run_id,
            RunEventKind::RunError {
                error_id: error.error_id.clone(),
                severity: error.severity.into(),
                message: error.message.clone(),
            },
        );
        Ok(error)
    }

    /// In-memory copy of a run in the table
    pub async fn get_run(&self, run_id: RunId) -> Option<Run> {
        let handle = self.runs.get(&run_id).map(|e| Arc::clone(e.value()))?;
        let run = handle.lock().await;
        Some(run.clone())
    }

    /// Persisted copy of a run
    ///
    /// # Errors
    /// See [`RunMeta::load_run`]
    pub fn load_run(&self, run_id: RunId) -> Result<Run, PipelineError> {
        RunMeta::load_run(&self.store, run_id)
    }

    #[must_use]
    pub fn run_ids(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self.runs.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Recover crashed runs on disk, leaving the runs of this process alone
    ///
    /// # Errors
    /// See [`HealthService::recover_locked_runs`]
    pub fn recover_locked_runs(&self) -> Result<Vec<RecoveredRun>, PipelineError> {
        HealthService::new(Arc::clone(&self.store)).recover_locked_runs(&self.run_ids())
    }
}

fn persist(store: &ArtifactStore, run: &Run) -> Result<(), PipelineError> {
    RunMeta::update(store, run.id, |meta| {
        meta.run = Some(run.clone());
        Ok(())
    })
}

fn collaborator(phase: RunState, err: &anyhow::Error) -> PipelineError {
    PipelineError::Collaborator {
        phase,
        message: format!("{err:#}"),
    }
}

fn with_defaults(mut request: ExecutionRequest, engine: TestEngine, timeout_ms: u64) -> ExecutionRequest {
    request.engine.get_or_insert(engine);
    request.timeout_ms.get_or_insert(timeout_ms);
    request
}

fn cancelled(mut summary: RunSummary, started: Instant) -> RunSummary {
    summary.state = RunState::Cancelled;
    summary.duration_ms = elapsed_ms(started);
    summary
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gapflow_artifact::StoreConfig;
    use gapflow_graph::{ScanCall, ScanEndpoint};

    struct FixedScan;

    #[async_trait]
    impl Collaborators for FixedScan {
        async fn scan(&self, _ctx: &RunContext) -> anyhow::Result<ScanResult> {
            Ok(ScanResult::new(
                vec![ScanEndpoint {
                    method: "GET".into(),
                    path: "/users".into(),
                    file: "users.ts".into(),
                    line: 12,
                }],
                vec![ScanCall {
                    method: "GET".into(),
                    endpoint: "/users".into(),
                    file: "Users.tsx".into(),
                    line: 50,
                }],
            ))
        }
    }

    fn orchestrator() -> (tempfile::TempDir, RunOrchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::open(dir.path().join(".gapflow"), &StoreConfig::default()));
        let orch = RunOrchestrator::new(store, Arc::new(EventBus::new()), Arc::new(FixedScan), &PipelineConfig::default());
        (dir, orch)
    }

    #[tokio::test]
    async fn invalid_transition_changes_nothing() {
        let (dir, orch) = orchestrator();
        let run = orch.create_run(dir.path(), RunConfig::analysis_only()).unwrap();
        let err = orch.transition_to(run.id, RunState::Done).await.unwrap_err();
        assert_eq!(err.code(), "RUN_INVALID_TRANSITION");
        assert_eq!(orch.get_run(run.id).await.unwrap().history.len(), 1);
        assert_eq!(orch.load_run(run.id).unwrap().history.len(), 1);
    }

    #[tokio::test]
    async fn analysis_run_reaches_done_and_unlocks() {
        let (dir, orch) = orchestrator();
        let run = orch.create_run(dir.path(), RunConfig::analysis_only()).unwrap();
        let summary = orch.execute_run(run.id).await.unwrap();
        assert_eq!(summary.state, RunState::Done);
        assert!((summary.coverage_ratio - 1.0).abs() < f64::EPSILON);
        assert!(!orch.store().is_locked(&run.id.to_string()));

        let persisted = orch.load_run(run.id).unwrap();
        assert_eq!(persisted.state, RunState::Done);
        assert!(persisted.duration_ms.is_some());
        assert_eq!(persisted.history.len(), 8);
    }

    #[tokio::test]
    async fn cancel_is_noop_after_done() {
        let (dir, orch) = orchestrator();
        let run = orch.create_run(dir.path(), RunConfig::analysis_only()).unwrap();
        orch.execute_run(run.id).await.unwrap();
        assert!(!orch.cancel_run(run.id).await.unwrap());

        let other = orch.create_run(dir.path(), RunConfig::analysis_only()).unwrap();
        assert!(orch.cancel_run(other.id).await.unwrap());
        assert_eq!(orch.get_run(other.id).await.unwrap().state, RunState::Cancelled);
    }
}

//! Testing utilities for the gapflow workspace
//!
//! Shared fixtures: sample scans, temporary workspaces, stub collaborators
//! and an event recorder.

#![allow(missing_docs)]

use async_trait::async_trait;
use gapflow_artifact::ArtifactStore;
use gapflow_core::{
    Collaborators, EventBus, PipelineConfig, Preview, RunContext, RunEvent, RunOrchestrator, RunState,
};
use gapflow_graph::{Report, ScanCall, ScanEndpoint, ScanResult};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub fn endpoint(method: &str, path: &str, file: &str, line: u32) -> ScanEndpoint {
    ScanEndpoint {
        method: method.to_string(),
        path: path.to_string(),
        file: file.to_string(),
        line,
    }
}

pub fn call(method: &str, url: &str, file: &str, line: u32) -> ScanCall {
    ScanCall {
        method: method.to_string(),
        endpoint: url.to_string(),
        file: file.to_string(),
        line,
    }
}

/// `GET /users` served and called: one edge, coverage 1.0
pub fn matched_scan() -> ScanResult {
    ScanResult::new(
        vec![endpoint("GET", "/users", "users.ts", 12)],
        vec![call("GET", "/users", "Users.tsx", 50)],
    )
}

/// Two endpoints, one of them orphaned, plus a call to a missing route
pub fn sample_scan() -> ScanResult {
    ScanResult::new(
        vec![
            endpoint("GET", "/users/:id", "users.ts", 12),
            endpoint("POST", "/orders", "orders.ts", 30),
        ],
        vec![
            call("GET", "/users/{id}?full=1", "User.tsx", 8),
            call("DELETE", "/missing", "Admin.tsx", 99),
        ],
    )
}

/// A workspace directory with the artifact root inside it
#[derive(Debug)]
pub struct TempWorkspace {
    dir: TempDir,
    config: PipelineConfig,
}

impl TempWorkspace {
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn artifact_root(&self) -> PathBuf {
        self.config.artifact_root(self.root())
    }

    pub fn store(&self) -> Arc<ArtifactStore> {
        Arc::new(ArtifactStore::open(self.artifact_root(), &self.config.store))
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn read(&self, rel: &str) -> Option<String> {
        std::fs::read_to_string(self.path(rel)).ok()
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.path(rel).exists()
    }

    /// Orchestrator over this workspace's store with a fresh event bus
    pub fn orchestrator(&self, collaborators: StubCollaborators) -> RunOrchestrator {
        RunOrchestrator::new(self.store(), Arc::new(EventBus::new()), Arc::new(collaborators), &self.config)
    }
}

impl Default for TempWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Collaborators with canned output
#[derive(Debug, Clone, Default)]
pub struct StubCollaborators {
    pub scan: ScanResult,
    /// Files of the single generated preview, `preview-1`
    pub files: Vec<(String, String)>,
    /// Phase whose collaborator call fails
    pub fail_at: Option<RunState>,
}

impl StubCollaborators {
    pub fn new(scan: ScanResult) -> Self {
        Self {
            scan,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_file(mut self, target: &str, content: &str) -> Self {
        self.files.push((target.to_string(), content.to_string()));
        self
    }

    #[must_use]
    pub fn failing_at(mut self, phase: RunState) -> Self {
        self.fail_at = Some(phase);
        self
    }

    fn check(&self, phase: RunState) -> anyhow::Result<()> {
        if self.fail_at == Some(phase) {
            anyhow::bail!("stub failure during {phase}");
        }
        Ok(())
    }
}

#[async_trait]
impl Collaborators for StubCollaborators {
    async fn scan(&self, _ctx: &RunContext) -> anyhow::Result<ScanResult> {
        self.check(RunState::Scanning)?;
        Ok(self.scan.clone())
    }

    async fn plan(&self, _ctx: &RunContext, _report: &Report) -> anyhow::Result<()> {
        self.check(RunState::Planning)
    }

    async fn generate(&self, ctx: &RunContext, _report: &Report) -> anyhow::Result<Vec<Preview>> {
        self.check(RunState::Generating)?;
        if self.files.is_empty() {
            return Ok(Vec::new());
        }
        let preview = self
            .files
            .iter()
            .fold(Preview::new(ctx.run_id, "preview-1"), |p, (target, content)| p.with_file(target, content));
        Ok(vec![preview])
    }

    async fn report(
        &self,
        _ctx: &RunContext,
        _report: &Report,
        _results: &[gapflow_core::ExecutionResult],
    ) -> anyhow::Result<()> {
        self.check(RunState::Reporting)
    }
}

/// Collects every event published on a bus
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<RunEvent>>>,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus) -> Self {
        let recorder = Self::default();
        let sink = Arc::clone(&recorder.events);
        bus.subscribe(move |event: &RunEvent| sink.lock().push(event.clone()));
        recorder
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().clone()
    }

    /// Event names in publish order
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.kind.name()).collect()
    }

    pub fn states(&self) -> Vec<RunState> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e.kind {
                gapflow_core::RunEventKind::StateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }
}

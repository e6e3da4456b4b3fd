//! Run lifecycle tests: transition table, races, phase pipeline, failures

use async_trait::async_trait;
use gapflow_core::{
    Collaborators, EventBus, PipelineError, Run, RunConfig, RunContext, RunErrorSeverity, RunEventKind, RunId, RunMeta,
    RunOrchestrator, RunState,
};
use gapflow_graph::{Delta, ScanResult, Trend};
use gapflow_test_utils::{matched_scan, sample_scan, EventRecorder, StubCollaborators, TempWorkspace};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

/// Persist a run directly in `state` so the orchestrator loads it on demand
fn seed(ws: &TempWorkspace, state: RunState) -> RunId {
    let store = ws.store();
    let mut run = Run::new(RunId::new(), ws.root().to_path_buf(), RunConfig::analysis_only());
    run.state = state;
    store.provision_run(&run.id.to_string()).unwrap();
    RunMeta::update(&store, run.id, |meta| {
        meta.run = Some(run.clone());
        Ok(())
    })
    .unwrap();
    run.id
}

#[tokio::test]
async fn every_pair_follows_the_table() {
    let ws = TempWorkspace::new();
    let orch = ws.orchestrator(StubCollaborators::new(matched_scan()));
    for from in RunState::ALL {
        for to in RunState::ALL {
            let run_id = seed(&ws, from);
            let before = orch.load_run(run_id).unwrap().history.len();
            let result = orch.transition_to(run_id, to).await;
            let after = orch.load_run(run_id).unwrap();

            if from.can_transition_to(to) {
                let record = result.unwrap();
                assert_eq!((record.from, record.to), (from, to));
                assert_eq!(after.history.len(), before + 1);
                assert_eq!(after.state, to);
            } else {
                assert!(matches!(result, Err(PipelineError::InvalidTransition { .. })), "{from} -> {to}");
                assert_eq!(after.history.len(), before);
                assert_eq!(after.state, from);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn history_counts_only_accepted_transitions(targets in prop::collection::vec(0usize..RunState::ALL.len(), 1..12)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ws = TempWorkspace::new();
            let orch = ws.orchestrator(StubCollaborators::new(matched_scan()));
            let run = orch.create_run(ws.root(), RunConfig::analysis_only()).unwrap();

            let mut state = RunState::Idle;
            let mut accepted = 0;
            for index in targets {
                let to = RunState::ALL[index];
                let ok = orch.transition_to(run.id, to).await.is_ok();
                prop_assert_eq!(ok, state.can_transition_to(to));
                if ok {
                    state = to;
                    accepted += 1;
                }
            }
            let persisted = orch.load_run(run.id).unwrap();
            prop_assert_eq!(persisted.history.len(), accepted + 1);
            prop_assert_eq!(persisted.state, state);
            Ok::<(), TestCaseError>(())
        })?;
    }
}

#[tokio::test]
async fn concurrent_transitions_have_one_winner() {
    let ws = TempWorkspace::new();
    let orch = Arc::new(ws.orchestrator(StubCollaborators::new(matched_scan())));
    let run = orch.create_run(ws.root(), RunConfig::analysis_only()).unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.transition_from(run.id, RunState::Idle, RunState::Scanning).await })
        })
        .collect();
    let mut wins = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => wins += 1,
            Err(PipelineError::StaleState { actual, .. }) => assert_eq!(actual, RunState::Scanning),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(orch.load_run(run.id).unwrap().history.len(), 2);
}

#[tokio::test]
async fn execute_run_writes_artifacts_and_events_in_order() {
    let ws = TempWorkspace::new();
    let orch = ws.orchestrator(StubCollaborators::new(sample_scan()));
    let recorder = EventRecorder::attach(orch.events());
    let run = orch.create_run(ws.root(), RunConfig::analysis_only()).unwrap();

    let summary = orch.execute_run(run.id).await.unwrap();
    assert_eq!(summary.state, RunState::Done);

    let names = recorder.names();
    assert_eq!(names.first(), Some(&"created"));
    assert_eq!(names.last(), Some(&"run_complete"));
    let started = names.iter().position(|n| *n == "scan_started").unwrap();
    let complete = names.iter().position(|n| *n == "scan_complete").unwrap();
    assert!(started < complete);
    assert_eq!(
        recorder.states(),
        vec![
            RunState::Scanning,
            RunState::Planning,
            RunState::Generating,
            RunState::Applying,
            RunState::Executing,
            RunState::Reporting,
            RunState::Done,
        ]
    );

    let root = ws.artifact_root();
    let key = run.id.to_string();
    for rel in [
        "scan.json",
        "graph.json",
        "report/report.json",
        "diagrams/api-overview.mmd",
        "diagrams/diagrams.json",
    ] {
        assert!(root.join("runs").join(&key).join(rel).is_file(), "{rel}");
    }
    assert!(!root.join("runs").join(&key).join("delta/delta.json").exists());
    let latest: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(root.join("latest.json")).unwrap()).unwrap();
    assert_eq!(latest["runId"], key.as_str());

    let scan_complete = recorder
        .events()
        .into_iter()
        .find_map(|e| match e.kind {
            RunEventKind::ScanComplete { artifacts, endpoints, calls } => Some((artifacts, endpoints, calls)),
            _ => None,
        })
        .unwrap();
    assert_eq!((scan_complete.1, scan_complete.2), (2, 2));
    assert_eq!(scan_complete.0.last().unwrap().to_str(), Some("latest.json"));
}

#[tokio::test]
async fn second_run_gets_a_validated_delta() {
    let ws = TempWorkspace::new();
    let first = ws.orchestrator(StubCollaborators::new(sample_scan()));
    let a = first.create_run(ws.root(), RunConfig::analysis_only()).unwrap();
    first.execute_run(a.id).await.unwrap();

    let second = ws.orchestrator(StubCollaborators::new(matched_scan()));
    let b = second.create_run(ws.root(), RunConfig::analysis_only()).unwrap();
    second.execute_run(b.id).await.unwrap();

    let store = ws.store();
    let delta: Delta = store.read_versioned(store.layout(&b.id.to_string()).delta()).unwrap();
    assert_eq!(delta.run_id_from, a.id.to_string());
    assert_eq!(delta.run_id_to, b.id.to_string());
    assert_eq!(delta.trend, Trend::Improving);
    assert!(gapflow_graph::validate_delta(&delta).is_ok());
}

#[tokio::test]
async fn collaborator_failure_fails_the_run_and_releases_the_lock() {
    let ws = TempWorkspace::new();
    let orch = ws.orchestrator(StubCollaborators::new(matched_scan()).failing_at(RunState::Planning));
    let recorder = EventRecorder::attach(orch.events());
    let run = orch.create_run(ws.root(), RunConfig::analysis_only()).unwrap();

    let err = orch.execute_run(run.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::Collaborator { phase: RunState::Planning, .. }));

    let persisted = orch.load_run(run.id).unwrap();
    assert_eq!(persisted.state, RunState::Failed);
    assert_eq!(persisted.errors.len(), 1);
    assert_eq!(persisted.errors[0].stage, RunState::Planning);
    assert_eq!(persisted.errors[0].severity, RunErrorSeverity::Error);
    assert!(!orch.store().is_locked(&run.id.to_string()));
    assert!(recorder.names().contains(&"run_error"));
}

#[tokio::test]
async fn failed_run_can_be_retried() {
    let ws = TempWorkspace::new();
    let failing = ws.orchestrator(StubCollaborators::new(matched_scan()).failing_at(RunState::Scanning));
    let run = failing.create_run(ws.root(), RunConfig::analysis_only()).unwrap();
    assert!(failing.execute_run(run.id).await.is_err());

    let healthy = ws.orchestrator(StubCollaborators::new(matched_scan()));
    let summary = healthy.execute_run(run.id).await.unwrap();
    assert_eq!(summary.state, RunState::Done);
    let persisted = healthy.load_run(run.id).unwrap();
    assert!(persisted.history.iter().any(|t| t.from == RunState::Failed && t.to == RunState::Scanning));
}

#[tokio::test]
async fn recorded_errors_do_not_move_the_run() {
    let ws = TempWorkspace::new();
    let orch: RunOrchestrator = ws.orchestrator(StubCollaborators::new(matched_scan()));
    let run = orch.create_run(ws.root(), RunConfig::analysis_only()).unwrap();
    orch.transition_to(run.id, RunState::Scanning).await.unwrap();

    let context = BTreeMap::from([("file".to_string(), "a.ts".to_string())]);
    let error = orch
        .record_error(run.id, "analyzer skipped a file", RunErrorSeverity::Warning, context)
        .await
        .unwrap();
    assert_eq!(error.stage, RunState::Scanning);

    let persisted = orch.load_run(run.id).unwrap();
    assert_eq!(persisted.state, RunState::Scanning);
    assert_eq!(persisted.errors, vec![error]);
}

#[tokio::test]
async fn cancel_only_applies_to_live_runs() {
    let ws = TempWorkspace::new();
    let orch = ws.orchestrator(StubCollaborators::new(matched_scan()));

    let failed = seed(&ws, RunState::Failed);
    assert!(!orch.cancel_run(failed).await.unwrap());
    assert_eq!(orch.load_run(failed).unwrap().state, RunState::Failed);

    let live = seed(&ws, RunState::Generating);
    assert!(orch.cancel_run(live).await.unwrap());
    let persisted = orch.load_run(live).unwrap();
    assert_eq!(persisted.state, RunState::Cancelled);
    assert!(persisted.ended_at.is_some());
}

/// Scan that announces it has started, then parks until released
struct ParkedScan {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Collaborators for ParkedScan {
    async fn scan(&self, _ctx: &RunContext) -> anyhow::Result<ScanResult> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(matched_scan())
    }
}

#[tokio::test]
async fn run_cancelled_mid_scan_does_not_become_latest() {
    let ws = TempWorkspace::new();
    let store = ws.store();
    let first = {
        let orch = ws.orchestrator(StubCollaborators::new(sample_scan()));
        let run = orch.create_run(ws.root(), RunConfig::analysis_only()).unwrap();
        orch.execute_run(run.id).await.unwrap();
        run.id
    };

    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let parked = ParkedScan {
        started: Arc::clone(&started),
        release: Arc::clone(&release),
    };
    let orch = RunOrchestrator::new(ws.store(), Arc::new(EventBus::new()), Arc::new(parked), ws.config());
    let run = orch.create_run(ws.root(), RunConfig::analysis_only()).unwrap();

    let (summary, was_cancelled) = tokio::join!(orch.execute_run(run.id), async {
        started.notified().await;
        let cancelled = orch.cancel_run(run.id).await.unwrap();
        release.notify_one();
        cancelled
    });
    assert!(was_cancelled);
    let summary = summary.unwrap();
    assert_eq!(summary.state, RunState::Cancelled);
    assert!(!summary.artifacts.contains(&PathBuf::from("latest.json")));

    assert_eq!(store.read_latest().unwrap().unwrap().run_id, first.to_string());
    assert!(!store.is_locked(&run.id.to_string()));
    assert_eq!(orch.load_run(run.id).unwrap().state, RunState::Cancelled);
}

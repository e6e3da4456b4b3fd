//! Health checks and crash recovery over a realistic artifact folder

use gapflow_core::{ArtifactReader, HealthService, HealthStatus, RunConfig, RunState};
use gapflow_test_utils::{matched_scan, sample_scan, StubCollaborators, TempWorkspace};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn completed_runs_are_healthy() {
    let ws = TempWorkspace::new();
    let orch = ws.orchestrator(StubCollaborators::new(sample_scan()));
    let run = orch.create_run(ws.root(), RunConfig::analysis_only()).unwrap();
    orch.execute_run(run.id).await.unwrap();

    let report = HealthService::new(ws.store()).run();
    assert_eq!(report.status, HealthStatus::Pass, "{:#?}", report.checks);
    assert_eq!(report.summary, "5 checks passed, 0 warnings, 0 failures");
    assert!(report.remediation.is_empty());

    let reader = ArtifactReader::new(ws.store());
    assert_eq!(reader.latest_run_id().unwrap(), Some(run.id));
    assert_eq!(reader.report(run.id).unwrap().gaps.len(), 2);
    assert_eq!(reader.diagram_index(run.id).unwrap().diagrams.len(), 3);
}

#[tokio::test]
async fn crashed_run_is_reported_then_recovered() {
    let ws = TempWorkspace::new();
    let run_id = {
        let orch = ws.orchestrator(StubCollaborators::new(matched_scan()));
        let run = orch.create_run(ws.root(), RunConfig::analysis_only()).unwrap();
        orch.transition_to(run.id, RunState::Scanning).await.unwrap();
        orch.store().create_lock(&run.id.to_string()).unwrap();
        run.id
    };

    let health = HealthService::new(ws.store());
    let report = health.run();
    let locked = report.checks.iter().find(|c| c.name == "locked_runs").unwrap();
    assert_eq!(locked.status, HealthStatus::Warn);
    assert!(locked.message.contains(&run_id.to_string()));
    assert!(report.remediation.iter().any(|r| r.contains("gapflow recover")));

    let orch = ws.orchestrator(StubCollaborators::new(matched_scan()));
    let recovered = orch.recover_locked_runs().unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].previous_state, Some(RunState::Scanning));
    assert_eq!(recovered[0].new_state, Some(RunState::Failed));

    let run = orch.load_run(run_id).unwrap();
    assert_eq!(run.state, RunState::Failed);
    assert_eq!(run.errors.len(), 1);
    assert!(orch.recover_locked_runs().unwrap().is_empty());

    let summary = orch.execute_run(run_id).await.unwrap();
    assert_eq!(summary.state, RunState::Done);
}

#[tokio::test]
async fn dangling_latest_pointer_fails() {
    let ws = TempWorkspace::new();
    let store = ws.store();
    store.write_latest("01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap();

    let report = HealthService::new(store).run();
    assert_eq!(report.status, HealthStatus::Fail);
    let latest = report.checks.iter().find(|c| c.name == "latest_pointer").unwrap();
    assert_eq!(latest.status, HealthStatus::Fail);
}

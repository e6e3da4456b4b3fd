//! Apply/rollback through the orchestrator and directly on the engine

use gapflow_core::{MutationAction, PipelineError, Preview, RunConfig, RunState};
use gapflow_artifact::ContentHash;
use gapflow_test_utils::{matched_scan, EventRecorder, StubCollaborators, TempWorkspace};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn auto_apply_then_rollback_restores_the_workspace() {
    let ws = TempWorkspace::new();
    ws.write("src/api.ts", "export const api = 1;\n");
    let original = ContentHash::compute(b"export const api = 1;\n");

    let stub = StubCollaborators::new(matched_scan())
        .with_file("src/api.ts", "export const api = 2;\n")
        .with_file("tests/api.test.ts", "test('api', () => {});\n");
    let orch = ws.orchestrator(stub);
    let recorder = EventRecorder::attach(orch.events());
    let run = orch.create_run(ws.root(), RunConfig::default().with_auto_apply(true)).unwrap();

    let summary = orch.execute_run(run.id).await.unwrap();
    assert_eq!(summary.previews, vec!["preview-1".to_string()]);
    assert_eq!(summary.applied.len(), 1);
    assert_eq!(ws.read("src/api.ts").as_deref(), Some("export const api = 2;\n"));
    assert!(ws.exists("tests/api.test.ts"));
    assert!(!ws.exists("src/api.ts.bak"));
    assert!(recorder.names().contains(&"mutation_applied"));

    let snapshot_id = summary.applied[0].snapshot_id;
    assert!(orch.mutation().is_rollback_available(run.id, snapshot_id));
    let outcome = orch.mutation().rollback(snapshot_id, run.id).await.unwrap();
    assert_eq!(outcome.files_restored, 2);
    assert_eq!(outcome.unchanged, 0);

    let restored = ws.read("src/api.ts").unwrap();
    assert_eq!(ContentHash::compute(restored.as_bytes()), original);
    assert!(!ws.exists("tests/api.test.ts"), "created file must be deleted, not emptied");

    let again = orch.mutation().rollback(snapshot_id, run.id).await.unwrap();
    assert_eq!(again.unchanged, 2);
    assert_eq!(ws.read("src/api.ts"), Some(restored));

    let log = orch.mutation().mutation_log(run.id).unwrap();
    assert_eq!(log.len(), 3);
    assert!(matches!(log[0].action, MutationAction::Apply { .. }));
    assert!(matches!(log[2].action, MutationAction::Rollback { .. }));
    assert_eq!(orch.mutation().verify_log(run.id).unwrap(), 3);
}

#[tokio::test]
async fn unconfirmed_auto_apply_fails_the_run_without_touching_files() {
    let ws = TempWorkspace::new();
    let stub = StubCollaborators::new(matched_scan()).with_file("foo.ts", "X");
    let orch = ws.orchestrator(stub);
    let run = orch.create_run(ws.root(), RunConfig::default().with_auto_apply(false)).unwrap();

    let err = orch.execute_run(run.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::ConfirmationRequired { .. }));
    assert!(!ws.exists("foo.ts"));
    assert!(orch.mutation().list_snapshots(run.id).unwrap().is_empty());

    let persisted = orch.load_run(run.id).unwrap();
    assert_eq!(persisted.state, RunState::Failed);
    assert_eq!(persisted.errors[0].stage, RunState::Applying);
}

#[tokio::test]
async fn rollback_latest_picks_the_newest_snapshot() {
    let ws = TempWorkspace::new();
    let orch = ws.orchestrator(StubCollaborators::new(matched_scan()));
    let run = orch.create_run(ws.root(), RunConfig::analysis_only()).unwrap();
    let store = orch.store();

    Preview::new(run.id, "first").with_file("foo.ts", "one").save(store).unwrap();
    Preview::new(run.id, "second").with_file("foo.ts", "two").save(store).unwrap();
    orch.mutation().apply_preview(run.id, "first", true).await.unwrap();
    let second = orch.mutation().apply_preview(run.id, "second", true).await.unwrap();

    let snapshots = orch.mutation().list_snapshots(run.id).unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].snapshot_id, second.snapshot_id);

    let outcome = orch.mutation().rollback_latest(run.id).await.unwrap();
    assert_eq!(outcome.snapshot_id, second.snapshot_id);
    assert_eq!(ws.read("foo.ts").as_deref(), Some("one"));

    assert!(orch.mutation().delete_snapshot(run.id, second.snapshot_id).await.unwrap());
    assert!(!orch.mutation().is_rollback_available(run.id, second.snapshot_id));
    assert_eq!(orch.mutation().list_snapshots(run.id).unwrap().len(), 1);
}

#[tokio::test]
async fn rollback_without_snapshots_is_an_error() {
    let ws = TempWorkspace::new();
    let orch = ws.orchestrator(StubCollaborators::new(matched_scan()));
    let run = orch.create_run(ws.root(), RunConfig::analysis_only()).unwrap();
    let err = orch.mutation().rollback_latest(run.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::NoSnapshots(_)));
}

#[tokio::test]
async fn tampered_log_is_detected() {
    let ws = TempWorkspace::new();
    let orch = ws.orchestrator(StubCollaborators::new(matched_scan()));
    let run = orch.create_run(ws.root(), RunConfig::analysis_only()).unwrap();
    Preview::new(run.id, "p").with_file("a.ts", "a").save(orch.store()).unwrap();
    orch.mutation().apply_preview(run.id, "p", true).await.unwrap();
    orch.mutation().rollback_latest(run.id).await.unwrap();

    let meta_path = ws.artifact_root().join("runs").join(run.id.to_string()).join("meta.json");
    let mut meta: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&meta_path).unwrap()).unwrap();
    meta["mutations"][0]["files"] = serde_json::json!(7);
    std::fs::write(&meta_path, serde_json::to_string(&meta).unwrap()).unwrap();

    let err = orch.mutation().verify_log(run.id).unwrap_err();
    assert!(matches!(err, PipelineError::LogIntegrity { index: 0, .. }));
}

#[tokio::test]
async fn damaged_newest_snapshot_blocks_rollback_latest() {
    let ws = TempWorkspace::new();
    ws.write("foo.ts", "orig");
    let orch = ws.orchestrator(StubCollaborators::new(matched_scan()));
    let run = orch.create_run(ws.root(), RunConfig::analysis_only()).unwrap();

    Preview::new(run.id, "first").with_file("foo.ts", "one").save(orch.store()).unwrap();
    Preview::new(run.id, "second").with_file("foo.ts", "two").save(orch.store()).unwrap();
    orch.mutation().apply_preview(run.id, "first", true).await.unwrap();
    let second = orch.mutation().apply_preview(run.id, "second", true).await.unwrap();

    let snapshot_json = ws
        .artifact_root()
        .join("runs")
        .join(run.id.to_string())
        .join("snapshots")
        .join(second.snapshot_id.to_string())
        .join("snapshot.json");
    std::fs::write(&snapshot_json, "{ corrupted").unwrap();

    let err = orch.mutation().rollback_latest(run.id).await.unwrap_err();
    assert!(
        matches!(&err, PipelineError::RollbackIntegrity { snapshot_id, .. } if *snapshot_id == second.snapshot_id.to_string()),
        "{err:?}"
    );
    assert_eq!(ws.read("foo.ts").as_deref(), Some("two"), "workspace must not move past the damaged snapshot");
    assert_eq!(orch.mutation().list_snapshots(run.id).unwrap().len(), 1);
}

//! gapflow Core - run lifecycle orchestrator and safe artifact pipeline
//!
//! - Drives runs through a fixed lifecycle with validated, persisted transitions
//! - Derives graph, report, diagrams and delta at the scan boundary
//! - Applies generated previews behind a snapshot and rolls them back
//! - Runs generated tests with a hard timeout and keeps the evidence
//! - Checks artifact health and recovers crashed runs
//!
//! # Example
//!
//! ```rust,ignore
//! use gapflow_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(collaborators: Arc<dyn Collaborators>) -> Result<(), PipelineError> {
//! let config = PipelineConfig::default();
//! let store = Arc::new(ArtifactStore::open(config.artifact_root(".".as_ref()), &config.store));
//! let orchestrator = RunOrchestrator::new(store, Arc::new(EventBus::new()), collaborators, &config);
//!
//! let run = orchestrator.create_run(".", RunConfig::analysis_only())?;
//! let summary = orchestrator.execute_run(run.id).await?;
//! println!("coverage {:.2}", summary.coverage_ratio);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod health;
pub mod mutation;
pub mod orchestrator;
pub mod policy;
pub mod reader;
pub mod run;
pub mod state;
pub mod types;

pub use config::{
    ExecutionConfig, PipelineConfig, PolicyConfig, RollbackConfig, RunConfig, ARTIFACT_DIR_ENV, DEFAULT_ARTIFACT_DIR,
};
pub use error::{ErrorSeverity, PipelineError};
pub use events::{EventBus, RunEvent, RunEventKind, SubscriptionId};
pub use execution::{
    ExecutionController, ExecutionRequest, ExecutionResult, ExecutionStatus, ExecutionSummary, TestEngine,
};
pub use health::{HealthCheck, HealthReport, HealthService, HealthStatus, RecoveredRun};
pub use mutation::{ApplyOutcome, MutationEngine, Preview, RollbackOutcome, Snapshot, SnapshotFile};
pub use orchestrator::{Collaborators, RunContext, RunOrchestrator, RunSummary};
pub use policy::{ActionKind, ActionPolicy, SafeAction};
pub use reader::ArtifactReader;
pub use run::{MutationAction, MutationRecord, Run, RunError, RunErrorSeverity, RunMeta, Transition};
pub use state::{validate_transition, IllegalTransition, RunState};
pub use types::{RunId, SnapshotId};

pub use gapflow_artifact::{ArtifactStore, StoreConfig, StoreError};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        ArtifactStore, Collaborators, EventBus, ExecutionRequest, MutationEngine, PipelineConfig, PipelineError,
        RunConfig, RunContext, RunId, RunOrchestrator, RunState, SnapshotId,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn shared_store_across_components() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::default();
        let store = Arc::new(ArtifactStore::open(config.artifact_root(dir.path()), &config.store));
        let events = Arc::new(EventBus::new());
        let engine = MutationEngine::new(Arc::clone(&store), Arc::clone(&events), &config);

        let run_id = RunId::new();
        assert!(engine.list_snapshots(run_id).unwrap().is_empty());
        assert_eq!(HealthService::new(store).run().checks.len(), 5);
    }

    #[test]
    fn every_error_code_is_upper_snake() {
        let err = PipelineError::RunNotFound(RunId::new());
        assert!(err.code().chars().all(|c| c.is_ascii_uppercase() || c == '_'));
    }
}

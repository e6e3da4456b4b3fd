//! Read-only, typed access to persisted run artifacts

use crate::error::PipelineError;
use crate::run::{Run, RunMeta};
use crate::types::RunId;
use gapflow_artifact::ArtifactStore;
use gapflow_graph::{Delta, DiagramIndex, Graph, Report, ScanResult};
use std::sync::Arc;

/// Each accessor validates the schema version of what it reads
#[derive(Debug, Clone)]
pub struct ArtifactReader {
    store: Arc<ArtifactStore>,
}

impl ArtifactReader {
    #[must_use]
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self { store }
    }

    /// # Errors
    /// Store read or schema failure
    pub fn scan(&self, run_id: RunId) -> Result<ScanResult, PipelineError> {
        Ok(self.store.read_versioned(self.store.layout(&run_id.to_string()).scan())?)
    }

    /// # Errors
    /// Store read or schema failure
    pub fn graph(&self, run_id: RunId) -> Result<Graph, PipelineError> {
        Ok(self.store.read_versioned(self.store.layout(&run_id.to_string()).graph())?)
    }

    /// # Errors
    /// Store read or schema failure
    pub fn report(&self, run_id: RunId) -> Result<Report, PipelineError> {
        Ok(self.store.read_versioned(self.store.layout(&run_id.to_string()).report())?)
    }

    /// Delta against the previous run, `None` for a first run
    ///
    /// # Errors
    /// Store read or schema failure other than absence
    pub fn delta(&self, run_id: RunId) -> Result<Option<Delta>, PipelineError> {
        match self.store.read_versioned(self.store.layout(&run_id.to_string()).delta()) {
            Ok(delta) => Ok(Some(delta)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// # Errors
    /// Store read or schema failure
    pub fn diagram_index(&self, run_id: RunId) -> Result<DiagramIndex, PipelineError> {
        Ok(self.store.read_versioned(self.store.layout(&run_id.to_string()).diagram_index())?)
    }

    /// Raw Mermaid source of one diagram file
    ///
    /// # Errors
    /// Store read failure
    pub fn diagram(&self, run_id: RunId, file_name: &str) -> Result<String, PipelineError> {
        Ok(self.store.read_text(self.store.layout(&run_id.to_string()).diagram(file_name))?)
    }

    /// # Errors
    /// See [`RunMeta::load`]
    pub fn meta(&self, run_id: RunId) -> Result<RunMeta, PipelineError> {
        RunMeta::load(&self.store, run_id)
    }

    /// # Errors
    /// See [`RunMeta::load_run`]
    pub fn run(&self, run_id: RunId) -> Result<Run, PipelineError> {
        RunMeta::load_run(&self.store, run_id)
    }

    /// Run named by `latest.json`
    ///
    /// # Errors
    /// Unreadable pointer, or a pointer holding an invalid id
    pub fn latest_run_id(&self) -> Result<Option<RunId>, PipelineError> {
        let Some(latest) = self.store.read_latest()? else {
            return Ok(None);
        };
        latest
            .run_id
            .parse()
            .map(Some)
            .map_err(|_| PipelineError::CorruptedRun {
                run_id: latest.run_id.clone(),
                reason: "latest.json holds an invalid run id".into(),
            })
    }

    /// Runs on disk, oldest first. Directories that are not run ids are skipped.
    ///
    /// # Errors
    /// Store listing failure
    pub fn list_runs(&self) -> Result<Vec<RunId>, PipelineError> {
        let mut runs: Vec<RunId> = self.store.list_runs()?.iter().filter_map(|name| name.parse().ok()).collect();
        runs.sort();
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gapflow_artifact::StoreConfig;
    use gapflow_graph::{build_graph, build_report};

    #[test]
    fn reads_back_typed_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::open(dir.path(), &StoreConfig::default()));
        let run_id = RunId::new();
        let layout = store.provision_run(&run_id.to_string()).unwrap();
        let scan = ScanResult::new(Vec::new(), Vec::new());
        let graph = build_graph(&scan);
        store.write_json(layout.scan(), &scan).unwrap();
        store.write_json(layout.graph(), &graph).unwrap();
        store.write_json(layout.report(), &build_report(&graph)).unwrap();
        store.write_latest(&run_id.to_string()).unwrap();
        store.provision_run("not-a-run").unwrap();

        let reader = ArtifactReader::new(store);
        assert_eq!(reader.graph(run_id).unwrap(), graph);
        assert!(reader.report(run_id).is_ok());
        assert!(reader.delta(run_id).unwrap().is_none());
        assert_eq!(reader.latest_run_id().unwrap(), Some(run_id));
        assert_eq!(reader.list_runs().unwrap(), vec![run_id]);
        assert!(matches!(reader.run(run_id), Err(PipelineError::RunNotFound(_))));
    }
}

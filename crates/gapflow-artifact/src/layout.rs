//! Run directory layout
//!
//! ```text
//! <artifact-root>/
//!   latest.json
//!   runs/<runId>/
//!     scan.json  graph.json  meta.json  run.lock
//!     report/report.json
//!     diagrams/*.mmd  diagrams/diagrams.json
//!     delta/delta.json
//!     evidence/execution-<testId>/{stdout.log, stderr.log, execution-meta.json}
//!     snapshots/<snapshotId>/snapshot.json
//!     previews/<previewId>/preview.json
//! ```
//!
//! All paths are relative to the artifact root.

use std::path::PathBuf;

pub const RUNS_DIR: &str = "runs";
pub const LATEST_FILE: &str = "latest.json";
pub const LOCK_FILE: &str = "run.lock";
pub const DIAGRAM_INDEX_FILE: &str = "diagrams.json";
pub const STDOUT_FILE: &str = "stdout.log";
pub const STDERR_FILE: &str = "stderr.log";
pub const EXECUTION_META_FILE: &str = "execution-meta.json";
pub const COVERAGE_FILE: &str = "coverage.json";

/// Relative paths for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    dir: PathBuf,
}

impl RunLayout {
    #[must_use]
    pub fn new(run_id: &str) -> Self {
        Self {
            dir: PathBuf::from(RUNS_DIR).join(run_id),
        }
    }

    #[inline]
    #[must_use]
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    #[must_use]
    pub fn scan(&self) -> PathBuf {
        self.dir.join("scan.json")
    }

    #[must_use]
    pub fn graph(&self) -> PathBuf {
        self.dir.join("graph.json")
    }

    #[must_use]
    pub fn report_dir(&self) -> PathBuf {
        self.dir.join("report")
    }

    #[must_use]
    pub fn report(&self) -> PathBuf {
        self.report_dir().join("report.json")
    }

    #[must_use]
    pub fn diagrams_dir(&self) -> PathBuf {
        self.dir.join("diagrams")
    }

    /// Path of a diagram file, e.g. `api-overview.mmd`
    #[must_use]
    pub fn diagram(&self, file: &str) -> PathBuf {
        self.diagrams_dir().join(file)
    }

    #[must_use]
    pub fn diagram_index(&self) -> PathBuf {
        self.diagrams_dir().join(DIAGRAM_INDEX_FILE)
    }

    #[must_use]
    pub fn delta_dir(&self) -> PathBuf {
        self.dir.join("delta")
    }

    #[must_use]
    pub fn delta(&self) -> PathBuf {
        self.delta_dir().join("delta.json")
    }

    #[must_use]
    pub fn meta(&self) -> PathBuf {
        self.dir.join("meta.json")
    }

    #[must_use]
    pub fn lock(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    #[must_use]
    pub fn evidence_root(&self) -> PathBuf {
        self.dir.join("evidence")
    }

    /// Evidence directory for one test execution
    #[must_use]
    pub fn evidence_dir(&self, test_id: &str) -> PathBuf {
        self.evidence_root().join(format!("execution-{test_id}"))
    }

    #[must_use]
    pub fn snapshots_dir(&self) -> PathBuf {
        self.dir.join("snapshots")
    }

    #[must_use]
    pub fn snapshot_dir(&self, snapshot_id: &str) -> PathBuf {
        self.snapshots_dir().join(snapshot_id)
    }

    #[must_use]
    pub fn snapshot(&self, snapshot_id: &str) -> PathBuf {
        self.snapshot_dir(snapshot_id).join("snapshot.json")
    }

    #[must_use]
    pub fn previews_dir(&self) -> PathBuf {
        self.dir.join("previews")
    }

    #[must_use]
    pub fn preview(&self, preview_id: &str) -> PathBuf {
        self.previews_dir().join(preview_id).join("preview.json")
    }

    /// Directories provisioned when a run is created
    #[must_use]
    pub fn provisioned_dirs(&self) -> [PathBuf; 7] {
        [
            self.dir.clone(),
            self.report_dir(),
            self.diagrams_dir(),
            self.delta_dir(),
            self.evidence_root(),
            self.snapshots_dir(),
            self.previews_dir(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_nest_under_run_dir() {
        let layout = RunLayout::new("01ABC");
        assert_eq!(layout.report(), PathBuf::from("runs/01ABC/report/report.json"));
        assert_eq!(
            layout.evidence_dir("t1").join(STDOUT_FILE),
            PathBuf::from("runs/01ABC/evidence/execution-t1/stdout.log")
        );
        assert_eq!(
            layout.snapshot("s1"),
            PathBuf::from("runs/01ABC/snapshots/s1/snapshot.json")
        );
        assert!(layout
            .provisioned_dirs()
            .iter()
            .all(|d| d.starts_with(layout.dir())));
    }
}

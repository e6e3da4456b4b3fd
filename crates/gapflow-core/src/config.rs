//! Pipeline and per-run configuration
//!
//! [`PipelineConfig`] is loaded once per process (TOML file plus environment
//! overrides) and handed to the components that need it. [`RunConfig`] travels
//! with each run and is persisted in its metadata.

use crate::error::PipelineError;
use crate::execution::TestEngine;
use crate::policy::ActionKind;
use gapflow_artifact::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding [`PipelineConfig::artifact_dir`]
pub const ARTIFACT_DIR_ENV: &str = "GAPFLOW_ARTIFACT_DIR";

/// Default artifact directory, relative to the workspace
pub const DEFAULT_ARTIFACT_DIR: &str = ".gapflow";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub default_engine: TestEngine,
    /// Hard wall-clock limit per test
    pub timeout_ms: u64,
    /// Upper bound on concurrently running tests in a parallel batch
    pub max_workers: usize,
    /// How long to keep draining output after the process exits or is killed
    pub drain_grace_ms: u64,
    pub capture_stdout: bool,
    pub capture_stderr: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_engine: TestEngine::Jest,
            timeout_ms: 60_000,
            max_workers: 4,
            drain_grace_ms: 500,
            capture_stdout: true,
            capture_stderr: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackConfig {
    /// Snapshots older than this are refused
    pub max_snapshot_age_days: u32,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            max_snapshot_age_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub allowed_actions: Vec<ActionKind>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_actions: ActionKind::ALL.to_vec(),
        }
    }
}

/// Process-wide configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Artifact root; relative paths resolve against the workspace
    pub artifact_dir: PathBuf,
    pub store: StoreConfig,
    pub execution: ExecutionConfig,
    pub rollback: RollbackConfig,
    pub policy: PolicyConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
            store: StoreConfig::default(),
            execution: ExecutionConfig::default(),
            rollback: RollbackConfig::default(),
            policy: PolicyConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// # Errors
    /// [`PipelineError::Config`] on malformed TOML
    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        toml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// [`PipelineError::Config`] if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Apply overrides from the process environment
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup(ARTIFACT_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            self.artifact_dir = PathBuf::from(dir);
        }
        self
    }

    /// Absolute artifact root for a workspace
    #[must_use]
    pub fn artifact_root(&self, workspace_root: &Path) -> PathBuf {
        if self.artifact_dir.is_absolute() {
            self.artifact_dir.clone()
        } else {
            workspace_root.join(&self.artifact_dir)
        }
    }

    /// # Errors
    /// [`PipelineError::Config`] on nonsensical values
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.execution.timeout_ms == 0 {
            return Err(PipelineError::Config("execution.timeout_ms must be positive".into()));
        }
        if self.execution.max_workers == 0 {
            return Err(PipelineError::Config("execution.max_workers must be positive".into()));
        }
        if self.store.max_read_bytes == 0 {
            return Err(PipelineError::Config("store.max_read_bytes must be positive".into()));
        }
        Ok(())
    }
}

/// Phases and limits for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunConfig {
    pub generate_tests: bool,
    /// Apply generated previews during the APPLYING phase
    pub auto_apply: bool,
    /// The user confirmed applying previews for this run
    pub apply_confirmed: bool,
    pub run_tests: bool,
    pub frameworks: Vec<TestEngine>,
    pub timeout_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            generate_tests: true,
            auto_apply: false,
            apply_confirmed: false,
            run_tests: false,
            frameworks: Vec::new(),
            timeout_ms: ExecutionConfig::default().timeout_ms,
        }
    }
}

impl RunConfig {
    /// Analysis only: scan, report, no generation or mutation
    #[must_use]
    pub fn analysis_only() -> Self {
        Self {
            generate_tests: false,
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn with_auto_apply(mut self, confirmed: bool) -> Self {
        self.auto_apply = true;
        self.apply_confirmed = confirmed;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_tests(mut self, engine: TestEngine) -> Self {
        self.run_tests = true;
        if !self.frameworks.contains(&engine) {
            self.frameworks.push(engine);
        }
        self
    }
}

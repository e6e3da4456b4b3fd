//! Bounded subprocess execution
//!
//! Each test runs as a direct child (no shell) in the run's workspace with
//! stdin closed and both output streams drained by background tasks. The
//! wall-clock limit is enforced around `wait()`. On expiry the child's whole
//! process group is killed and the child reaped. The drains then get a short
//! grace period, after which they are aborted so a grandchild holding a pipe
//! open cannot stall the caller.

use super::command::{validate_test_path, CommandSpec, TestEngine};
use super::evidence::{write_evidence, write_rejection, ExecutionResult, ExecutionStatus};
use crate::config::ExecutionConfig;
use crate::error::PipelineError;
use crate::events::{EventBus, RunEventKind};
use crate::run::RunMeta;
use crate::types::{is_safe_token, RunId};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use gapflow_artifact::{ArtifactStore, ScopedDir};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// One test to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Evidence directory key; letters, digits, `-`, `_`, `.`
    pub test_id: String,
    /// Workspace-relative (or absolute, inside the workspace) test file
    pub test_file: String,
    /// Falls back to the configured default engine
    pub engine: Option<TestEngine>,
    /// Falls back to the configured timeout
    pub timeout_ms: Option<u64>,
}

impl ExecutionRequest {
    #[must_use]
    pub fn new(test_id: impl Into<String>, test_file: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            test_file: test_file.into(),
            engine: None,
            timeout_ms: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_engine(mut self, engine: TestEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// A validated request, ready to spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTest {
    pub workdir: PathBuf,
    /// Absolute path of the test file
    pub test_path: PathBuf,
    pub engine: TestEngine,
    pub command: CommandSpec,
}

struct ProcessOutcome {
    status: ExecutionStatus,
    exit_code: Option<i32>,
    pid: Option<u32>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    error: Option<String>,
}

impl ProcessOutcome {
    fn spawn_failed(message: String) -> Self {
        Self {
            status: ExecutionStatus::Error,
            exit_code: None,
            pid: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            error: Some(message),
        }
    }
}

#[derive(Debug)]
pub struct ExecutionController {
    store: Arc<ArtifactStore>,
    events: Arc<EventBus>,
    config: ExecutionConfig,
    max_read_bytes: u64,
}

impl ExecutionController {
    #[must_use]
    pub fn new(store: Arc<ArtifactStore>, events: Arc<EventBus>, config: ExecutionConfig, max_read_bytes: u64) -> Self {
        Self {
            store,
            events,
            config,
            max_read_bytes,
        }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Check the request and build its command without running anything.
    ///
    /// # Errors
    /// [`PipelineError::ExecutionSetup`] for an unsafe test id or path
    /// characters, [`PipelineError::Store`] if the file leaves the workspace
    pub fn prepare(&self, run_id: RunId, request: &ExecutionRequest) -> Result<PreparedTest, PipelineError> {
        let setup = |reason: String| PipelineError::ExecutionSetup {
            test_id: request.test_id.clone(),
            reason,
        };
        if !is_safe_token(&request.test_id) {
            return Err(setup(format!("unsafe test id `{}`", request.test_id)));
        }
        let run = RunMeta::load_run(&self.store, run_id)?;
        let workspace = ScopedDir::new(&run.workspace_root).with_max_read_bytes(self.max_read_bytes);
        let resolved = workspace.resolve(&request.test_file)?;
        let relative = resolved
            .strip_prefix(workspace.root())
            .map_err(|_| setup("test file is not below the workspace root".into()))?;
        let relative = relative
            .to_str()
            .ok_or_else(|| setup("test path is not valid UTF-8".into()))?
            .to_string();
        validate_test_path(&relative).map_err(setup)?;

        let engine = request.engine.unwrap_or(self.config.default_engine);
        Ok(PreparedTest {
            workdir: workspace.root().to_path_buf(),
            command: engine.command(&relative),
            test_path: resolved,
            engine,
        })
    }

    /// Run one test and persist its evidence.
    ///
    /// Only containment and input-validation failures are returned as
    /// errors; everything that happens once the request is accepted
    /// (spawn failure, non-zero exit, timeout) is reported in the result.
    ///
    /// # Errors
    /// See [`ExecutionController::prepare`]; evidence write failure
    pub async fn execute_test(&self, run_id: RunId, request: &ExecutionRequest) -> Result<ExecutionResult, PipelineError> {
        let prepared = self.prepare(run_id, request)?;
        let timeout = Duration::from_millis(request.timeout_ms.unwrap_or(self.config.timeout_ms));

        tracing::info!(run_id = %run_id, test_id = %request.test_id, command = %prepared.command, "executing test");
        let started_at = Utc::now();
        let clock = Instant::now();
        let outcome = if prepared.test_path.is_file() {
            self.run_process(&prepared.command, &prepared.workdir, timeout).await
        } else {
            ProcessOutcome::spawn_failed(format!("test file {} not found", prepared.test_path.display()))
        };
        let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);

        let result = ExecutionResult {
            test_id: request.test_id.clone(),
            run_id,
            engine: prepared.engine,
            status: outcome.status,
            started_at,
            ended_at: Utc::now(),
            duration_ms,
            stdout: String::from_utf8_lossy(&outcome.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&outcome.stderr).into_owned(),
            exit_code: outcome.exit_code,
            pid: outcome.pid,
            error: outcome.error,
        };
        write_evidence(&self.store, &result, &prepared.command)?;

        match result.status {
            ExecutionStatus::Passed => tracing::info!(test_id = %result.test_id, duration_ms, "test passed"),
            ExecutionStatus::Failed => {
                tracing::info!(test_id = %result.test_id, exit_code = ?result.exit_code, "test failed");
            }
            ExecutionStatus::Timeout => tracing::warn!(test_id = %result.test_id, ?timeout, "test timed out"),
            ExecutionStatus::Error => {
                tracing::warn!(test_id = %result.test_id, err = ?result.error, "test could not run");
            }
        }
        self.events.emit(
            run_id,
            RunEventKind::TestExecuted {
                test_id: result.test_id.clone(),
                status: result.status,
            },
        );
        Ok(result)
    }

    /// Run a test, folding any error into an ERROR result. A rejected
    /// request still leaves an `execution-meta.json` when its test id is
    /// usable as a directory name.
    pub async fn execute_isolated(&self, run_id: RunId, request: &ExecutionRequest) -> ExecutionResult {
        match self.execute_test(run_id, request).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(run_id = %run_id, test_id = %request.test_id, code = e.code(), err = %e, "test rejected");
                let result = ExecutionResult::not_started(
                    run_id,
                    &request.test_id,
                    request.engine.unwrap_or(self.config.default_engine),
                    &e,
                );
                // an unsafe test id has no evidence directory to write into
                if is_safe_token(&request.test_id) {
                    if let Err(write_err) = write_rejection(&self.store, &result) {
                        tracing::warn!(run_id = %run_id, test_id = %request.test_id, err = %write_err, "rejection evidence not written");
                    }
                }
                result
            }
        }
    }

    /// Run tests one after another. A failing test never stops the batch.
    pub async fn execute_batch(&self, run_id: RunId, requests: &[ExecutionRequest]) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.execute_isolated(run_id, request).await);
        }
        results
    }

    /// Run tests with at most `max_workers` in flight (config default if
    /// `None`). Results come back in request order.
    pub async fn execute_parallel(
        &self,
        run_id: RunId,
        requests: &[ExecutionRequest],
        max_workers: Option<usize>,
    ) -> Vec<ExecutionResult> {
        let workers = max_workers.unwrap_or(self.config.max_workers).max(1);
        let mut slots: Vec<Option<ExecutionResult>> = vec![None; requests.len()];
        let mut completions = stream::iter(requests.iter().enumerate())
            .map(|(index, request)| async move { (index, self.execute_isolated(run_id, request).await) })
            .buffer_unordered(workers);
        while let Some((index, result)) = completions.next().await {
            slots[index] = Some(result);
        }
        slots.into_iter().flatten().collect()
    }

    async fn run_process(&self, spec: &CommandSpec, cwd: &Path, timeout: Duration) -> ProcessOutcome {
        let pipe = |capture: bool| if capture { Stdio::piped() } else { Stdio::null() };
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(pipe(self.config.capture_stdout))
            .stderr(pipe(self.config.capture_stderr))
            .kill_on_drop(true);
        // own process group, so a timeout can take down everything the test started
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return ProcessOutcome::spawn_failed(format!("failed to spawn `{}`: {e}", spec.program)),
        };
        let pid = child.id();

        let stdout = Arc::new(Mutex::new(Vec::new()));
        let stderr = Arc::new(Mutex::new(Vec::new()));
        let mut drains: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            drains.push(tokio::spawn(drain(out, Arc::clone(&stdout))));
        }
        if let Some(err) = child.stderr.take() {
            drains.push(tokio::spawn(drain(err, Arc::clone(&stderr))));
        }

        let (status, exit_code, error) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(exit)) => {
                let status = if exit.success() {
                    ExecutionStatus::Passed
                } else {
                    ExecutionStatus::Failed
                };
                (status, exit.code(), None)
            }
            Ok(Err(e)) => {
                kill_group(pid).await;
                let _ = child.start_kill();
                let _ = child.wait().await;
                (ExecutionStatus::Error, None, Some(format!("wait failed: {e}")))
            }
            Err(_) => {
                kill_group(pid).await;
                if let Err(e) = child.start_kill() {
                    tracing::warn!(?pid, err = %e, "kill after timeout failed");
                }
                let _ = child.wait().await;
                (
                    ExecutionStatus::Timeout,
                    None,
                    Some(format!("timed out after {}ms", timeout.as_millis())),
                )
            }
        };

        let grace = Duration::from_millis(self.config.drain_grace_ms);
        let drained = tokio::time::timeout(grace, async {
            for handle in &mut drains {
                let _ = handle.await;
            }
        })
        .await;
        if drained.is_err() {
            tracing::debug!(?pid, "output drain exceeded grace period");
            for handle in &drains {
                handle.abort();
            }
        }

        let stdout = std::mem::take(&mut *stdout.lock());
        let stderr = std::mem::take(&mut *stderr.lock());
        ProcessOutcome {
            status,
            exit_code,
            pid,
            stdout,
            stderr,
            error,
        }
    }
}

/// SIGKILL the whole process group led by `pid`
#[cfg(unix)]
async fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    let status = Command::new("kill")
        .args(["-KILL", "--", &format!("-{pid}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(s) if !s.success() => tracing::debug!(pid, "process group already gone"),
        Ok(_) => {}
        Err(e) => tracing::warn!(pid, err = %e, "failed to signal process group"),
    }
}

#[cfg(not(unix))]
async fn kill_group(_pid: Option<u32>) {}

async fn drain<R: AsyncRead + Unpin>(mut reader: R, sink: Arc<Mutex<Vec<u8>>>) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builders() {
        let request = ExecutionRequest::new("t1", "a.sh")
            .with_engine(TestEngine::Shell)
            .with_timeout_ms(10);
        assert_eq!(request.engine, Some(TestEngine::Shell));
        assert_eq!(request.timeout_ms, Some(10));
    }
}

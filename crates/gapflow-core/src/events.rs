//! Typed lifecycle event bus
//!
//! Events form a closed set ([`RunEventKind`]). Subscribers register a handler
//! and get back a [`SubscriptionId`] they can later hand to
//! [`EventBus::unsubscribe`]. Handlers run synchronously on the publishing
//! task, outside the subscriber lock, so a handler may itself subscribe or
//! unsubscribe.

use crate::error::ErrorSeverity;
use crate::execution::ExecutionStatus;
use crate::state::RunState;
use crate::types::{RunId, SnapshotId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Event payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RunEventKind {
    Created { workspace_root: PathBuf },
    StateChanged { from: RunState, to: RunState },
    ScanStarted,
    /// Artifacts written at the scan boundary, relative to the artifact root
    ScanComplete {
        artifacts: Vec<PathBuf>,
        endpoints: usize,
        calls: usize,
    },
    RunComplete { duration_ms: u64 },
    RunError {
        error_id: String,
        severity: ErrorSeverity,
        message: String,
    },
    MutationApplied {
        snapshot_id: SnapshotId,
        preview_id: String,
        files: usize,
    },
    RolledBack {
        snapshot_id: SnapshotId,
        files_restored: usize,
    },
    TestExecuted { test_id: String, status: ExecutionStatus },
}

impl RunEventKind {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::StateChanged { .. } => "state_changed",
            Self::ScanStarted => "scan_started",
            Self::ScanComplete { .. } => "scan_complete",
            Self::RunComplete { .. } => "run_complete",
            Self::RunError { .. } => "run_error",
            Self::MutationApplied { .. } => "mutation_applied",
            Self::RolledBack { .. } => "rolled_back",
            Self::TestExecuted { .. } => "test_executed",
        }
    }
}

/// One published event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    pub event_id: Uuid,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: RunEventKind,
}

impl RunEvent {
    #[must_use]
    pub fn new(run_id: RunId, kind: RunEventKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            run_id,
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&RunEvent) + Send + Sync>;

/// In-process publish/subscribe for [`RunEvent`]s
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(SubscriptionId, Handler)>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&RunEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Forward every event into an unbounded channel. The subscription stays
    /// registered until unsubscribed; sends to a dropped receiver are ignored.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    /// Returns `false` if the id was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(sid, _)| *sid != id);
        handlers.len() != before
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn publish(&self, event: RunEvent) {
        tracing::trace!(run_id = %event.run_id, event = event.kind.name(), "publish");
        let handlers: Vec<Handler> = self.handlers.read().iter().map(|(_, h)| Arc::clone(h)).collect();
        for handler in handlers {
            handler(&event);
        }
    }

    /// Build and publish an event for `run_id`
    pub fn emit(&self, run_id: RunId, kind: RunEventKind) {
        self.publish(RunEvent::new(run_id, kind));
    }
}

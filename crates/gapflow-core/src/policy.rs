//! Action policy: a closed allow-list of user-triggerable actions plus the
//! action-specific preconditions each one must satisfy.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Scan,
    OpenReport,
    CompareRuns,
    ExplainNode,
    GenerateTest,
    ViewDiagram,
    ApplyRecommendation,
    ApplyTestPreview,
    RollbackApply,
    ExecuteTests,
}

impl ActionKind {
    pub const ALL: [Self; 10] = [
        Self::Scan,
        Self::OpenReport,
        Self::CompareRuns,
        Self::ExplainNode,
        Self::GenerateTest,
        Self::ViewDiagram,
        Self::ApplyRecommendation,
        Self::ApplyTestPreview,
        Self::RollbackApply,
        Self::ExecuteTests,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::OpenReport => "open-report",
            Self::CompareRuns => "compare-runs",
            Self::ExplainNode => "explain-node",
            Self::GenerateTest => "generate-test",
            Self::ViewDiagram => "view-diagram",
            Self::ApplyRecommendation => "apply-recommendation",
            Self::ApplyTestPreview => "apply-test-preview",
            Self::RollbackApply => "rollback-apply",
            Self::ExecuteTests => "execute-tests",
        }
    }

    /// Actions that write into the user's workspace
    #[must_use]
    pub const fn mutates_workspace(self) -> bool {
        matches!(self, Self::ApplyRecommendation | Self::ApplyTestPreview | Self::RollbackApply)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested action with the parameters its checks need
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafeAction {
    Scan { workspace_folder: Option<PathBuf> },
    OpenReport,
    CompareRuns,
    ExplainNode,
    GenerateTest { auto_apply: bool },
    ViewDiagram,
    ApplyRecommendation { recommendation_id: Option<String> },
    ApplyTestPreview { confirmed: bool },
    RollbackApply,
    ExecuteTests,
}

impl SafeAction {
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::Scan { .. } => ActionKind::Scan,
            Self::OpenReport => ActionKind::OpenReport,
            Self::CompareRuns => ActionKind::CompareRuns,
            Self::ExplainNode => ActionKind::ExplainNode,
            Self::GenerateTest { .. } => ActionKind::GenerateTest,
            Self::ViewDiagram => ActionKind::ViewDiagram,
            Self::ApplyRecommendation { .. } => ActionKind::ApplyRecommendation,
            Self::ApplyTestPreview { .. } => ActionKind::ApplyTestPreview,
            Self::RollbackApply => ActionKind::RollbackApply,
            Self::ExecuteTests => ActionKind::ExecuteTests,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPolicy {
    allowed: HashSet<ActionKind>,
}

impl Default for ActionPolicy {
    fn default() -> Self {
        Self::new(ActionKind::ALL)
    }
}

impl ActionPolicy {
    #[must_use]
    pub fn new(allowed: impl IntoIterator<Item = ActionKind>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_allowed(&self, kind: ActionKind) -> bool {
        self.allowed.contains(&kind)
    }

    /// # Errors
    /// [`PipelineError::PolicyViolation`] for disallowed actions or failed
    /// preconditions, [`PipelineError::ConfirmationRequired`] when a workspace
    /// mutation lacks confirmation
    pub fn check(&self, action: &SafeAction) -> Result<(), PipelineError> {
        let kind = action.kind();
        let violation = |reason: &str| PipelineError::PolicyViolation {
            action: kind.to_string(),
            reason: reason.to_string(),
        };

        if !self.is_allowed(kind) {
            tracing::warn!(action = %kind, "action rejected by policy");
            return Err(violation("action is not in the allowed set"));
        }
        match action {
            SafeAction::Scan { workspace_folder: None } => Err(violation("no workspace folder is open")),
            SafeAction::GenerateTest { auto_apply: true } => {
                Err(violation("generated tests must be previewed before they are applied"))
            }
            SafeAction::ApplyRecommendation { recommendation_id } => match recommendation_id.as_deref() {
                Some(id) if !id.trim().is_empty() => Ok(()),
                _ => Err(violation("a recommendation id is required")),
            },
            SafeAction::ApplyTestPreview { confirmed: false } => Err(PipelineError::ConfirmationRequired {
                action: kind.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

impl From<&crate::config::PolicyConfig> for ActionPolicy {
    fn from(config: &crate::config::PolicyConfig) -> Self {
        Self::new(config.allowed_actions.iter().copied())
    }
}

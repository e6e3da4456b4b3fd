//! Run lifecycle states and the fixed transition table

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunState {
    Idle,
    Scanning,
    Planning,
    Generating,
    Applying,
    Executing,
    Reporting,
    Done,
    Failed,
    Cancelled,
}

impl RunState {
    pub const ALL: [Self; 10] = [
        Self::Idle,
        Self::Scanning,
        Self::Planning,
        Self::Generating,
        Self::Applying,
        Self::Executing,
        Self::Reporting,
        Self::Done,
        Self::Failed,
        Self::Cancelled,
    ];

    /// States reachable from `self`. FAILED and CANCELLED only lead back to
    /// SCANNING (retry); DONE leads nowhere.
    #[must_use]
    pub const fn allowed_transitions(self) -> &'static [Self] {
        use RunState::*;
        match self {
            Idle => &[Scanning, Cancelled],
            Scanning => &[Planning, Failed, Cancelled],
            Planning => &[Generating, Failed, Cancelled],
            Generating => &[Applying, Failed, Cancelled],
            Applying => &[Executing, Failed, Cancelled],
            Executing => &[Reporting, Failed, Cancelled],
            Reporting => &[Done, Failed, Cancelled],
            Done => &[],
            Failed | Cancelled => &[Scanning],
        }
    }

    #[inline]
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// DONE, FAILED or CANCELLED
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Phase that follows `self` on the happy path
    #[must_use]
    pub const fn next_phase(self) -> Option<Self> {
        use RunState::*;
        match self {
            Idle | Failed | Cancelled => Some(Scanning),
            Scanning => Some(Planning),
            Planning => Some(Generating),
            Generating => Some(Applying),
            Applying => Some(Executing),
            Executing => Some(Reporting),
            Reporting => Some(Done),
            Done => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Scanning => "SCANNING",
            Self::Planning => "PLANNING",
            Self::Generating => "GENERATING",
            Self::Applying => "APPLYING",
            Self::Executing => "EXECUTING",
            Self::Reporting => "REPORTING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition rejected by the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: RunState,
    pub to: RunState,
}

/// # Errors
/// [`IllegalTransition`] if `to` is not reachable from `from`
pub fn validate_transition(from: RunState, to: RunState) -> Result<(), IllegalTransition> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(IllegalTransition { from, to })
    }
}

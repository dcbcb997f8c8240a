//! Pipeline state and terminal result enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The state of a pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Claiming the period, generating items and writing the audit trail.
    #[default]
    Init,
    /// Dispatching work items through the fan-out executor.
    FanOut,
    /// Running the completion handler.
    Finalize,
    /// Terminal success.
    Success,
    /// Terminal failure.
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::FanOut => write!(f, "fan_out"),
            Self::Finalize => write!(f, "finalize"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl PipelineState {
    /// Returns true if no further transitions are possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Returns true if the state is a working stage.
    #[must_use]
    pub fn is_stage(&self) -> bool {
        matches!(self, Self::Init | Self::FanOut | Self::Finalize)
    }
}

/// Terminal outcome of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "cause", rename_all = "snake_case")]
pub enum RunResult {
    /// The period was already claimed by another run; nothing was done.
    SuccessEmpty,
    /// All items were processed and the completion handler ran.
    SuccessCompleted,
    /// The run failed; carries the captured cause.
    Failed(String),
}

impl RunResult {
    /// Returns true for either success variant.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::SuccessEmpty | Self::SuccessCompleted)
    }

    /// Returns the failure cause, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&str> {
        match self {
            Self::Failed(cause) => Some(cause),
            _ => None,
        }
    }

    /// Returns the terminal state this result corresponds to.
    #[must_use]
    pub fn terminal_state(&self) -> PipelineState {
        if self.is_success() {
            PipelineState::Success
        } else {
            PipelineState::Failed
        }
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SuccessEmpty => write!(f, "success_empty"),
            Self::SuccessCompleted => write!(f, "success_completed"),
            Self::Failed(cause) => write!(f, "failed: {cause}"),
        }
    }
}

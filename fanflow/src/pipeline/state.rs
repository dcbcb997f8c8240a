//! Pipeline state machine.
//!
//! The table is a pure function so the driving loop in the orchestrator can
//! be tested separately from the transitions it is allowed to make.

use serde::{Deserialize, Serialize};

use crate::core::PipelineState;
use crate::errors::InvalidTransition;

/// Events that drive a run between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageEvent {
    /// Claim won, items generated and the audit trail committed.
    InitSucceeded,
    /// Another run already holds the period.
    AlreadyClaimed,
    /// Init failed transiently and has retries left.
    InitRetry,
    /// Init failed fatally or exhausted its retries.
    InitFailed,
    /// Every item succeeded.
    FanOutSucceeded,
    /// At least one item failed.
    FanOutFailed,
    /// The completion handler succeeded.
    FinalizeSucceeded,
    /// The completion handler failed or timed out.
    FinalizeFailed,
    /// The overall run bound expired.
    RunTimedOut,
}

impl StageEvent {
    /// Stable name used in logs and errors.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::InitSucceeded => "init_succeeded",
            Self::AlreadyClaimed => "already_claimed",
            Self::InitRetry => "init_retry",
            Self::InitFailed => "init_failed",
            Self::FanOutSucceeded => "fan_out_succeeded",
            Self::FanOutFailed => "fan_out_failed",
            Self::FinalizeSucceeded => "finalize_succeeded",
            Self::FinalizeFailed => "finalize_failed",
            Self::RunTimedOut => "run_timed_out",
        }
    }
}

impl std::fmt::Display for StageEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns the state a run moves to when `event` happens in `state`.
pub fn transition(state: PipelineState, event: StageEvent) -> Result<PipelineState, InvalidTransition> {
    use PipelineState::{Failed, FanOut, Finalize, Init, Success};

    let target = match (state, event) {
        // Init
        (Init, StageEvent::InitSucceeded) => FanOut,
        (Init, StageEvent::AlreadyClaimed) => Success,
        (Init, StageEvent::InitRetry) => Init,
        (Init, StageEvent::InitFailed) => Failed,

        // FanOut
        (FanOut, StageEvent::FanOutSucceeded) => Finalize,
        (FanOut, StageEvent::FanOutFailed) => Failed,

        // Finalize
        (Finalize, StageEvent::FinalizeSucceeded) => Success,
        (Finalize, StageEvent::FinalizeFailed) => Failed,

        (Init | FanOut | Finalize, StageEvent::RunTimedOut) => Failed,

        (from, event) => {
            return Err(InvalidTransition {
                from,
                event: event.name(),
            })
        }
    };

    Ok(target)
}

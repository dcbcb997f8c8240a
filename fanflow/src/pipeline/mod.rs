//! Pipeline orchestration.
//!
//! This module provides:
//! - The state machine and its transition table
//! - Init retry policy with exponential backoff
//! - The Finalize completion handler boundary
//! - The orchestrator that drives a run to a terminal state

mod finalize;
mod orchestrator;
mod retry;
mod state;

#[cfg(test)]
mod integration_tests;

pub use finalize::{CompletionHandler, CompletionSummary, LoggingCompletionHandler};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, RunReport};
pub use retry::{InitRetryPolicy, RetryDecision, RetryState};
pub use state::{transition, StageEvent};

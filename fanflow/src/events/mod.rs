//! Lifecycle events emitted by the orchestrator.
//!
//! Events are observability only: a sink can never change the outcome of a
//! run. The orchestrator receives its sink explicitly.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::core::{PipelineState, RunResult};

/// A lifecycle event of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A trigger started a run.
    RunStarted {
        /// The run's marker.
        run_marker: Uuid,
        /// The period the trigger fell into.
        period_key: String,
    },
    /// The run entered a state.
    StateEntered {
        /// The run's marker.
        run_marker: Uuid,
        /// The state entered.
        state: PipelineState,
    },
    /// The period was already claimed; the run ends empty.
    ClaimSkipped {
        /// The run's marker.
        run_marker: Uuid,
        /// The period key.
        period_key: String,
    },
    /// Init failed transiently and will be retried.
    InitRetryScheduled {
        /// The run's marker.
        run_marker: Uuid,
        /// The attempt that failed, 1-based.
        attempt: u32,
        /// Backoff before the next attempt.
        delay_ms: u64,
        /// The failure, as produced by `FanflowError::to_dict`.
        error: HashMap<String, serde_json::Value>,
    },
    /// The fan-out stage finished.
    FanOutCompleted {
        /// The run's marker.
        run_marker: Uuid,
        /// Items whose worker succeeded.
        succeeded: usize,
        /// Items whose worker failed.
        failed: usize,
        /// Items never dispatched.
        not_started: usize,
        /// Items aborted mid-flight.
        aborted: usize,
        /// Highest observed concurrency.
        peak_in_flight: usize,
    },
    /// The run reached a terminal state.
    RunCompleted {
        /// The run's marker.
        run_marker: Uuid,
        /// The terminal result.
        result: RunResult,
        /// Init attempts made.
        init_attempts: u32,
        /// Wall time of the run in milliseconds.
        elapsed_ms: f64,
    },
}

impl PipelineEvent {
    /// Dotted event type used by sinks.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "pipeline.started",
            Self::StateEntered { .. } => "stage.entered",
            Self::ClaimSkipped { .. } => "dedup.already_claimed",
            Self::InitRetryScheduled { .. } => "stage.init.retry_scheduled",
            Self::FanOutCompleted { .. } => "stage.fan_out.completed",
            Self::RunCompleted { result, .. } => {
                if result.is_success() {
                    "pipeline.completed"
                } else {
                    "pipeline.failed"
                }
            }
        }
    }

    /// The run this event belongs to.
    #[must_use]
    pub fn run_marker(&self) -> Uuid {
        match self {
            Self::RunStarted { run_marker, .. }
            | Self::StateEntered { run_marker, .. }
            | Self::ClaimSkipped { run_marker, .. }
            | Self::InitRetryScheduled { run_marker, .. }
            | Self::FanOutCompleted { run_marker, .. }
            | Self::RunCompleted { run_marker, .. } => *run_marker,
        }
    }

    /// JSON payload of the event.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

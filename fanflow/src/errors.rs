//! Error types for fanflow.
//!
//! The taxonomy separates what the orchestrator retries from what it
//! escalates immediately:
//!
//! - [`StoreError`] and stage timeouts are transient and retried during Init.
//! - [`ConfigError`] is fatal and never retried.
//! - [`WorkerError`] fails the fan-out stage and the whole run.
//!
//! A duplicate claim is not an error at all; it is reported through
//! [`crate::dedup::ClaimOutcome::AlreadyClaimed`].

use crate::core::{PipelineState, WorkItem};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// The main error type for fanflow operations.
#[derive(Debug, Error)]
pub enum FanflowError {
    /// A claim or audit store fault.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// A fan-out item failed.
    #[error("{0}")]
    Worker(#[from] WorkerError),

    /// Configuration is missing or invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The state machine was driven with an event it does not accept.
    #[error("{0}")]
    InvalidTransition(#[from] InvalidTransition),

    /// A stage or the whole run exceeded its time bound.
    #[error("Stage '{state}' timed out after {}ms", .timeout.as_millis())]
    Timeout {
        /// The state that was running.
        state: PipelineState,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// The completion handler failed.
    #[error("Finalize failed: {0}")]
    Finalize(String),
}

impl FanflowError {
    /// Creates a timeout error for the given state.
    #[must_use]
    pub fn timeout(state: PipelineState, timeout: Duration) -> Self {
        Self::Timeout { state, timeout }
    }

    /// Classifies the error for the orchestrator's retry decision.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Store(_) | Self::Timeout { .. } => ErrorClass::Transient,
            Self::Worker(_) => ErrorClass::Worker,
            Self::Config(_) | Self::InvalidTransition(_) | Self::Finalize(_) => ErrorClass::Fatal,
        }
    }

    /// Converts to a dictionary representation for events.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        let kind = match self {
            Self::Store(_) => "StoreError",
            Self::Worker(_) => "WorkerError",
            Self::Config(_) => "ConfigurationError",
            Self::InvalidTransition(_) => "InvalidTransition",
            Self::Timeout { .. } => "TimeoutError",
            Self::Finalize(_) => "FinalizeError",
        };
        map.insert("type".to_string(), serde_json::json!(kind));
        map.insert("class".to_string(), serde_json::json!(self.class()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// How the orchestrator treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Infrastructure fault or timeout; retried where the stage allows it.
    Transient,
    /// Cannot succeed on retry; escalated immediately.
    Fatal,
    /// A fan-out item failed; escalates the whole run.
    Worker,
}

/// A transient fault in a claim or audit store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backing store could not be reached or rejected the request.
    #[error("Store '{store}' unavailable: {reason}")]
    Unavailable {
        /// The store name.
        store: String,
        /// The reason reported by the store.
        reason: String,
    },

    /// A multi-record transaction was rolled back; nothing was committed.
    #[error("Transaction on '{store}' cancelled after staging {staged} of {total} records: {reason}")]
    TransactionCancelled {
        /// The store name.
        store: String,
        /// Records staged before the failure.
        staged: usize,
        /// Records in the batch.
        total: usize,
        /// The reason for the rollback.
        reason: String,
    },
}

impl StoreError {
    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(store: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            store: store.into(),
            reason: reason.into(),
        }
    }

    /// Creates a cancelled transaction error.
    #[must_use]
    pub fn transaction_cancelled(
        store: impl Into<String>,
        staged: usize,
        total: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::TransactionCancelled {
            store: store.into(),
            staged,
            total,
            reason: reason.into(),
        }
    }
}

/// A failure reported for a single fan-out item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    /// The worker returned an error.
    #[error("Item {time_key}: {sequence_index} failed: {message}")]
    Failed {
        /// Period label of the item.
        time_key: String,
        /// Index of the item.
        sequence_index: u32,
        /// Error message from the worker.
        message: String,
    },

    /// The worker exceeded the per-item timeout.
    #[error("Item {time_key}: {sequence_index} timed out after {timeout_ms}ms")]
    TimedOut {
        /// Period label of the item.
        time_key: String,
        /// Index of the item.
        sequence_index: u32,
        /// The per-item bound in milliseconds.
        timeout_ms: u64,
    },

    /// The worker task panicked.
    #[error("Item {time_key}: {sequence_index} panicked: {message}")]
    Panicked {
        /// Period label of the item.
        time_key: String,
        /// Index of the item.
        sequence_index: u32,
        /// Panic or join error description.
        message: String,
    },
}

impl WorkerError {
    /// Creates a failure for the given item.
    #[must_use]
    pub fn failed(item: &WorkItem, message: impl Into<String>) -> Self {
        Self::Failed {
            time_key: item.time_key.clone(),
            sequence_index: item.sequence_index,
            message: message.into(),
        }
    }

    /// Creates a timeout for the given item.
    #[must_use]
    pub fn timed_out(item: &WorkItem, timeout: Duration) -> Self {
        Self::TimedOut {
            time_key: item.time_key.clone(),
            sequence_index: item.sequence_index,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Creates a panic error for the given item.
    #[must_use]
    pub fn panicked(item: &WorkItem, message: impl Into<String>) -> Self {
        Self::Panicked {
            time_key: item.time_key.clone(),
            sequence_index: item.sequence_index,
            message: message.into(),
        }
    }

    /// Returns the index of the failed item.
    #[must_use]
    pub fn sequence_index(&self) -> u32 {
        match self {
            Self::Failed { sequence_index, .. }
            | Self::TimedOut { sequence_index, .. }
            | Self::Panicked { sequence_index, .. } => *sequence_index,
        }
    }
}

/// Missing or invalid runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required value was not set.
    #[error("Missing required configuration value: {0}")]
    Missing(&'static str),

    /// A value was set but is not acceptable.
    #[error("Invalid configuration value for {field}: {reason}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// The state machine received an event it has no transition for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid transition from '{from}' on event '{event}'")]
pub struct InvalidTransition {
    /// The state the machine was in.
    pub from: PipelineState,
    /// The event type that was rejected.
    pub event: &'static str,
}

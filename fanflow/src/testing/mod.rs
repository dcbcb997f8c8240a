//! Testing utilities for fanflow pipelines.
//!
//! This module provides:
//! - Claim and audit stores with scripted faults
//! - Workers that record, fail or stall
//! - Completion handlers that record or fail

mod mocks;

pub use mocks::{
    FailingCompletionHandler, FailingWorker, FlakyAuditStore, FlakyClaimStore,
    RecordingCompletionHandler, RecordingWorker, SlowWorker,
};

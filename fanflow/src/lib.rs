//! # Fanflow
//!
//! A periodic fan-out pipeline with at-most-once initiation per period.
//!
//! Each trigger runs three stages in sequence:
//!
//! - **Init**: claim the period through the dedup guard, generate the work
//!   items and persist their audit trail atomically. Transient faults are
//!   retried with exponential backoff.
//! - **FanOut**: run an opaque worker over every item with bounded
//!   concurrency. Any item failure fails the run.
//! - **Finalize**: run the completion handler once.
//!
//! A second trigger within the same period finds the claim taken and ends
//! as an empty success.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fanflow::prelude::*;
//!
//! let config = PipelineConfig::new("fanflow-records");
//! let orchestrator = Orchestrator::builder(config)
//!     .worker(Arc::new(MyWorker))
//!     .build();
//!
//! let report = orchestrator.run().await;
//! assert!(report.is_success());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod audit;
pub mod config;
pub mod core;
pub mod dedup;
pub mod errors;
pub mod events;
pub mod fanout;
pub mod generator;
pub mod pipeline;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::audit::{
        AuditRecord, AuditStore, AuditWriter, FileAuditStore, InMemoryAuditStore,
    };
    pub use crate::config::{PipelineConfig, StageTimeouts};
    pub use crate::core::{PipelineState, RunResult, WorkItem};
    pub use crate::dedup::{
        ClaimOutcome, ClaimStore, DedupGuard, DedupRecord, FileClaimStore, InMemoryClaimStore,
    };
    pub use crate::errors::{ConfigError, FanflowError, StoreError, WorkerError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent};
    pub use crate::fanout::{
        CompletionPolicy, FanOutExecutor, FanOutReport, FnWorker, Worker, WorkerOutput,
    };
    pub use crate::generator::generate;
    pub use crate::pipeline::{
        CompletionHandler, CompletionSummary, InitRetryPolicy, LoggingCompletionHandler,
        Orchestrator, RunReport,
    };
    pub use crate::utils::{Clock, FixedClock, Period, SystemClock};
}

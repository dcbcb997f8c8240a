//! Fan-out stage: an opaque worker run over every item with bounded
//! concurrency.

mod executor;
mod worker;

pub use executor::{CompletionPolicy, FanOutExecutor, FanOutReport, ItemOutcome, ItemResult};
pub use worker::{FnWorker, NoOpWorker, Worker, WorkerOutput};

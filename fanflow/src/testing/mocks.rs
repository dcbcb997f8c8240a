//! Scripted stores, workers and handlers for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditRecord, AuditStore, InMemoryAuditStore};
use crate::core::WorkItem;
use crate::dedup::{ClaimStore, DedupRecord, InMemoryClaimStore, PutOutcome};
use crate::errors::{FanflowError, StoreError, WorkerError};
use crate::fanout::{Worker, WorkerOutput};
use crate::pipeline::{CompletionHandler, CompletionSummary};
use crate::utils::Clock;

/// A claim store that fails, or commits and then stalls, a fixed number of
/// times before delegating to an [`InMemoryClaimStore`].
#[derive(Debug)]
pub struct FlakyClaimStore {
    inner: InMemoryClaimStore,
    failures_left: AtomicU32,
    stalls_left: AtomicU32,
    stall: Duration,
    calls: AtomicU32,
}

impl FlakyClaimStore {
    /// Fails the first `failures` calls.
    #[must_use]
    pub fn failing_first(failures: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: InMemoryClaimStore::new(clock),
            failures_left: AtomicU32::new(failures),
            stalls_left: AtomicU32::new(0),
            stall: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    /// Fails every call.
    #[must_use]
    pub fn always_failing(clock: Arc<dyn Clock>) -> Self {
        Self::failing_first(u32::MAX, clock)
    }

    /// Commits the first `stalls` calls, then sleeps for `stall` before
    /// replying, so the caller can time out after the write landed.
    #[must_use]
    pub fn stalling_first(stalls: u32, stall: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            stalls_left: AtomicU32::new(stalls),
            stall,
            ..Self::failing_first(0, clock)
        }
    }

    /// Number of `put_if_absent` calls made.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &InMemoryClaimStore {
        &self.inner
    }
}

#[async_trait]
impl ClaimStore for FlakyClaimStore {
    async fn put_if_absent(&self, record: DedupRecord) -> Result<PutOutcome, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failures_left) {
            return Err(StoreError::unavailable("claims", "injected fault"));
        }
        let outcome = self.inner.put_if_absent(record).await;
        if take_one(&self.stalls_left) {
            tokio::time::sleep(self.stall).await;
        }
        outcome
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

/// An audit store that fails, or commits and then stalls, a fixed number of
/// batches before delegating to an [`InMemoryAuditStore`].
#[derive(Debug)]
pub struct FlakyAuditStore {
    inner: InMemoryAuditStore,
    failures_left: AtomicU32,
    stalls_left: AtomicU32,
    stall: Duration,
    calls: AtomicU32,
}

impl FlakyAuditStore {
    /// Fails the first `failures` batches.
    #[must_use]
    pub fn failing_first(failures: u32) -> Self {
        Self {
            inner: InMemoryAuditStore::new(),
            failures_left: AtomicU32::new(failures),
            stalls_left: AtomicU32::new(0),
            stall: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    /// Commits the first `stalls` batches, then sleeps for `stall` before
    /// replying.
    #[must_use]
    pub fn stalling_first(stalls: u32, stall: Duration) -> Self {
        Self {
            stalls_left: AtomicU32::new(stalls),
            stall,
            ..Self::failing_first(0)
        }
    }

    /// Number of `write_batch` calls made.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &InMemoryAuditStore {
        &self.inner
    }
}

#[async_trait]
impl AuditStore for FlakyAuditStore {
    async fn write_batch(&self, records: Vec<AuditRecord>) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failures_left) {
            return Err(StoreError::transaction_cancelled(
                "audit",
                0,
                records.len(),
                "injected fault",
            ));
        }
        let outcome = self.inner.write_batch(records).await;
        if take_one(&self.stalls_left) {
            tokio::time::sleep(self.stall).await;
        }
        outcome
    }
}

/// A worker that records every call and tracks its own concurrency.
#[derive(Debug, Default)]
pub struct RecordingWorker {
    delay: Duration,
    calls: Mutex<Vec<WorkItem>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingWorker {
    /// Creates a worker that succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a worker that sleeps for `delay` before succeeding.
    #[must_use]
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Number of items processed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Items processed, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<WorkItem> {
        self.calls.lock().clone()
    }

    /// Highest number of concurrent calls observed.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for RecordingWorker {
    async fn process(&self, item: &WorkItem) -> Result<WorkerOutput, WorkerError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.lock().push(item.clone());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(WorkerOutput::success())
    }
}

/// A worker that fails on one item index and succeeds on every other.
#[derive(Debug)]
pub struct FailingWorker {
    index: u32,
    message: String,
    calls: AtomicUsize,
}

impl FailingWorker {
    /// Fails the item at `index` with `"Dummy Error!"`.
    #[must_use]
    pub fn on_index(index: u32) -> Self {
        Self::with_message(index, "Dummy Error!")
    }

    /// Fails the item at `index` with a custom message.
    #[must_use]
    pub fn with_message(index: u32, message: impl Into<String>) -> Self {
        Self {
            index,
            message: message.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of items processed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for FailingWorker {
    async fn process(&self, item: &WorkItem) -> Result<WorkerOutput, WorkerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if item.sequence_index == self.index {
            return Err(WorkerError::failed(item, &self.message));
        }
        Ok(WorkerOutput::success())
    }
}

/// A worker where one item fails quickly while the others run slowly.
#[derive(Debug)]
pub struct SlowWorker {
    fail_index: u32,
    fail_after: Duration,
    delay: Duration,
    completed: AtomicUsize,
}

impl SlowWorker {
    /// Fails `fail_index` after a few milliseconds; every other item sleeps
    /// for `delay` and then succeeds.
    #[must_use]
    pub fn failing_fast(fail_index: u32, delay: Duration) -> Self {
        Self {
            fail_index,
            fail_after: Duration::from_millis(5),
            delay,
            completed: AtomicUsize::new(0),
        }
    }

    /// Number of slow items that ran to completion.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for SlowWorker {
    async fn process(&self, item: &WorkItem) -> Result<WorkerOutput, WorkerError> {
        if item.sequence_index == self.fail_index {
            tokio::time::sleep(self.fail_after).await;
            return Err(WorkerError::failed(item, "Dummy Error!"));
        }
        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(WorkerOutput::success())
    }
}

/// A completion handler that always fails.
#[derive(Debug)]
pub struct FailingCompletionHandler {
    message: String,
}

impl FailingCompletionHandler {
    /// Creates a handler failing with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl CompletionHandler for FailingCompletionHandler {
    async fn complete(&self, _summary: &CompletionSummary) -> Result<(), FanflowError> {
        Err(FanflowError::Finalize(self.message.clone()))
    }
}

/// A completion handler that records summaries and optionally stalls.
#[derive(Debug, Default)]
pub struct RecordingCompletionHandler {
    delay: Duration,
    summaries: Mutex<Vec<CompletionSummary>>,
}

impl RecordingCompletionHandler {
    /// Creates a handler that succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handler that sleeps for `delay` before succeeding.
    #[must_use]
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Summaries received, in call order.
    #[must_use]
    pub fn summaries(&self) -> Vec<CompletionSummary> {
        self.summaries.lock().clone()
    }
}

#[async_trait]
impl CompletionHandler for RecordingCompletionHandler {
    async fn complete(&self, summary: &CompletionSummary) -> Result<(), FanflowError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.summaries.lock().push(summary.clone());
        Ok(())
    }
}

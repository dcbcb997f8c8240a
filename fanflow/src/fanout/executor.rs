//! Bounded-concurrency fan-out executor.
//!
//! Every item is spawned onto a [`JoinSet`], but a worker only runs while
//! its task holds a semaphore permit, so at most `concurrency_limit`
//! workers are ever in flight.
//!
//! On the first failure the semaphore is closed: items still waiting for a
//! permit are reported [`ItemOutcome::NotStarted`]. What happens to workers
//! already running depends on the [`CompletionPolicy`].

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::worker::{Worker, WorkerOutput};
use crate::core::WorkItem;
use crate::errors::WorkerError;

/// What to do with running workers once an item has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Stop dispatching and wait for running workers to finish (default).
    #[default]
    DrainInFlight,
    /// Stop dispatching and abort running workers.
    AbortInFlight,
}

/// Outcome of a single item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The worker succeeded.
    Succeeded(WorkerOutput),
    /// The worker failed, timed out or panicked.
    Failed(WorkerError),
    /// The item was never dispatched because an earlier item failed.
    NotStarted,
    /// The worker was running and got aborted.
    Aborted,
}

impl ItemOutcome {
    /// Returns true if the worker succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Result for one item, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemResult {
    /// The item.
    pub item: WorkItem,
    /// What happened to it.
    pub outcome: ItemOutcome,
}

/// Aggregate outcome of a fan-out.
#[derive(Debug, Clone)]
pub struct FanOutReport {
    /// Per-item results, in input order.
    pub results: Vec<ItemResult>,
    /// The first failure observed, if any.
    pub first_error: Option<WorkerError>,
    /// Highest number of workers observed in flight at once.
    pub peak_in_flight: usize,
    /// Wall time of the fan-out in milliseconds.
    pub duration_ms: f64,
}

impl FanOutReport {
    /// Returns true if every item succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.first_error.is_none() && self.results.iter().all(|r| r.outcome.is_success())
    }

    /// Number of items whose worker succeeded.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Succeeded(_)))
    }

    /// Number of items whose worker failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed(_)))
    }

    /// Number of items never dispatched.
    #[must_use]
    pub fn not_started(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::NotStarted))
    }

    /// Number of items aborted mid-flight.
    #[must_use]
    pub fn aborted(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Aborted))
    }

    fn count(&self, predicate: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| predicate(&r.outcome)).count()
    }
}

/// Keeps the in-flight counter honest even when a task is aborted.
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn enter(in_flight: Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs a worker over a set of items with bounded concurrency.
#[derive(Debug, Clone)]
pub struct FanOutExecutor {
    concurrency_limit: usize,
    item_timeout: Duration,
    policy: CompletionPolicy,
}

impl FanOutExecutor {
    /// Creates an executor. A zero limit is raised to one.
    #[must_use]
    pub fn new(concurrency_limit: usize, item_timeout: Duration) -> Self {
        Self {
            concurrency_limit: concurrency_limit.max(1),
            item_timeout,
            policy: CompletionPolicy::default(),
        }
    }

    /// Sets the completion policy.
    #[must_use]
    pub fn with_policy(mut self, policy: CompletionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The concurrency limit.
    #[must_use]
    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// The completion policy.
    #[must_use]
    pub fn policy(&self) -> CompletionPolicy {
        self.policy
    }

    /// Runs `worker` over `items`.
    ///
    /// Returns once every item has an outcome. Ordering between workers is
    /// unspecified.
    pub async fn run(&self, items: Vec<WorkItem>, worker: Arc<dyn Worker>) -> FanOutReport {
        let start = Instant::now();
        let total = items.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let started: Arc<Vec<AtomicBool>> =
            Arc::new((0..total).map(|_| AtomicBool::new(false)).collect());

        let mut tasks = JoinSet::new();
        for (position, item) in items.iter().cloned().enumerate() {
            let semaphore = semaphore.clone();
            let worker = worker.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            let started = started.clone();
            let item_timeout = self.item_timeout;

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.clone().acquire_owned().await else {
                    return (position, ItemOutcome::NotStarted);
                };
                started[position].store(true, Ordering::SeqCst);
                let _guard = InFlightGuard::enter(in_flight, &peak);

                info!(
                    time_key = %item.time_key,
                    sequence_index = item.sequence_index,
                    "{}: {}",
                    item.time_key,
                    item.sequence_index
                );

                let call = AssertUnwindSafe(worker.process(&item)).catch_unwind();
                let outcome = match tokio::time::timeout(item_timeout, call).await {
                    Ok(Ok(Ok(output))) => ItemOutcome::Succeeded(output),
                    Ok(Ok(Err(error))) => ItemOutcome::Failed(error),
                    Ok(Err(panic)) => ItemOutcome::Failed(WorkerError::panicked(
                        &item,
                        panic_message(panic.as_ref()),
                    )),
                    Err(_) => ItemOutcome::Failed(WorkerError::timed_out(&item, item_timeout)),
                };
                // Close before the permit drops so no waiter inherits it.
                if matches!(outcome, ItemOutcome::Failed(_)) {
                    semaphore.close();
                }
                (position, outcome)
            });
        }

        let mut outcomes: Vec<Option<ItemOutcome>> = (0..total).map(|_| None).collect();
        let mut first_error: Option<WorkerError> = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, outcome)) => {
                    if let ItemOutcome::Failed(ref error) = outcome {
                        if first_error.is_none() {
                            warn!(
                                error = %error,
                                policy = ?self.policy,
                                "Fan-out item failed, stopping dispatch"
                            );
                            first_error = Some(error.clone());
                            if self.policy == CompletionPolicy::AbortInFlight {
                                tasks.abort_all();
                            }
                        }
                    }
                    outcomes[position] = Some(outcome);
                }
                Err(join_error) if join_error.is_cancelled() => {}
                Err(join_error) => {
                    error!(error = %join_error, "Fan-out task failed to join");
                }
            }
        }

        let results = items
            .into_iter()
            .zip(outcomes)
            .enumerate()
            .map(|(position, (item, outcome))| {
                let outcome = outcome.unwrap_or_else(|| {
                    if started[position].load(Ordering::SeqCst) {
                        ItemOutcome::Aborted
                    } else {
                        ItemOutcome::NotStarted
                    }
                });
                ItemResult { item, outcome }
            })
            .collect();

        FanOutReport {
            results,
            first_error,
            peak_in_flight: peak.load(Ordering::SeqCst),
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

//! Worker boundary for fan-out items.
//!
//! Workers hold the business logic run for each item. The executor treats
//! them as opaque: it only looks at whether they succeeded.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::core::WorkItem;
use crate::errors::WorkerError;

/// Status returned by a successful worker invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerOutput {
    /// Free-form status reported by the worker.
    pub status: String,
}

impl WorkerOutput {
    /// The conventional success output.
    #[must_use]
    pub fn success() -> Self {
        Self {
            status: "success".to_string(),
        }
    }

    /// An output with a custom status.
    #[must_use]
    pub fn with_status(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
        }
    }
}

/// Trait for per-item workers.
#[async_trait]
pub trait Worker: Send + Sync + Debug {
    /// Processes one item.
    async fn process(&self, item: &WorkItem) -> Result<WorkerOutput, WorkerError>;
}

/// A worker backed by a synchronous closure.
pub struct FnWorker<F>
where
    F: Fn(&WorkItem) -> Result<WorkerOutput, WorkerError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnWorker<F>
where
    F: Fn(&WorkItem) -> Result<WorkerOutput, WorkerError> + Send + Sync,
{
    /// Creates a new closure-backed worker.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnWorker<F>
where
    F: Fn(&WorkItem) -> Result<WorkerOutput, WorkerError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnWorker").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Worker for FnWorker<F>
where
    F: Fn(&WorkItem) -> Result<WorkerOutput, WorkerError> + Send + Sync,
{
    async fn process(&self, item: &WorkItem) -> Result<WorkerOutput, WorkerError> {
        (self.func)(item)
    }
}

/// A worker that accepts every item.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpWorker;

#[async_trait]
impl Worker for NoOpWorker {
    async fn process(&self, _item: &WorkItem) -> Result<WorkerOutput, WorkerError> {
        Ok(WorkerOutput::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_worker() {
        let worker = FnWorker::new("odd-fails", |item: &WorkItem| {
            if item.sequence_index % 2 == 1 {
                Err(WorkerError::failed(item, "odd"))
            } else {
                Ok(WorkerOutput::success())
            }
        });

        assert!(worker.process(&WorkItem::new("2024/01/01", 0)).await.is_ok());
        assert!(worker.process(&WorkItem::new("2024/01/01", 1)).await.is_err());
        assert!(format!("{worker:?}").contains("odd-fails"));
    }

    #[tokio::test]
    async fn test_noop_worker() {
        let output = NoOpWorker
            .process(&WorkItem::new("2024/01/01", 5))
            .await
            .unwrap();
        assert_eq!(output, WorkerOutput::success());
        assert_eq!(output.status, "success");
    }
}

//! Finalize stage: the completion handler run after a successful fan-out.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Debug;
use tracing::info;
use uuid::Uuid;

use crate::errors::FanflowError;

/// What the completion handler is told about the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionSummary {
    /// The run's marker.
    pub run_marker: Uuid,
    /// The claimed period key.
    pub period_key: String,
    /// The period label shared by all items.
    pub time_key: String,
    /// Number of items processed.
    pub item_count: usize,
    /// Wall time of the fan-out in milliseconds.
    pub fan_out_ms: f64,
}

/// Runs once after every item has succeeded.
#[async_trait]
pub trait CompletionHandler: Send + Sync + Debug {
    /// Handles the completion. Any error fails the run.
    async fn complete(&self, summary: &CompletionSummary) -> Result<(), FanflowError>;
}

/// Logs a single success line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCompletionHandler;

#[async_trait]
impl CompletionHandler for LoggingCompletionHandler {
    async fn complete(&self, summary: &CompletionSummary) -> Result<(), FanflowError> {
        info!(
            run_marker = %summary.run_marker,
            period_key = %summary.period_key,
            item_count = summary.item_count,
            "[finalize]: success"
        );
        Ok(())
    }
}

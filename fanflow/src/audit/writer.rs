//! Batch writer for a run's audit trail.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::store::{AuditRecord, AuditStore};
use crate::core::WorkItem;
use crate::errors::StoreError;

/// Persists one audit record per work item as a single atomic batch.
#[derive(Debug, Clone)]
pub struct AuditWriter {
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    /// Creates a writer over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Writes the audit trail for `items`.
    ///
    /// `expires_at` is the claim's expiry so the trail and the claim age out
    /// together. Returns the number of records committed.
    pub async fn persist_all(
        &self,
        run_marker: Uuid,
        items: &[WorkItem],
        expires_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let records: Vec<_> = items
            .iter()
            .map(|item| AuditRecord::for_item(run_marker, item, expires_at))
            .collect();
        let count = records.len();

        match self.store.write_batch(records).await {
            Ok(()) => {
                debug!(%run_marker, count, "Audit trail committed");
                Ok(count)
            }
            Err(error) => {
                warn!(%run_marker, count, error = %error, "Audit trail rolled back");
                Err(error)
            }
        }
    }
}

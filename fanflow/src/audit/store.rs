//! Audit store boundary and the in-memory implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use uuid::Uuid;

use crate::core::WorkItem;
use crate::errors::StoreError;

const STORE_NAME: &str = "audit";

/// Persisted record of one scheduled work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Marker of the run that scheduled the item.
    pub run_marker: Uuid,
    /// Period label of the item.
    pub time_key: String,
    /// Index of the item.
    pub sequence_index: u32,
    /// When the record becomes eligible for removal.
    pub expires_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Creates the audit record for `item`.
    #[must_use]
    pub fn for_item(run_marker: Uuid, item: &WorkItem, expires_at: DateTime<Utc>) -> Self {
        Self {
            run_marker,
            time_key: item.time_key.clone(),
            sequence_index: item.sequence_index,
            expires_at,
        }
    }

    /// Partition and sort key of the record in the shared table.
    #[must_use]
    pub fn table_key(&self) -> (String, String) {
        (
            format!("run#{}", self.run_marker),
            format!("audit#{}#{:05}", self.time_key, self.sequence_index),
        )
    }
}

/// Storage for audit records.
#[async_trait]
pub trait AuditStore: Send + Sync + Debug {
    /// Writes every record in one transaction. Either all records are
    /// committed or none are.
    ///
    /// A record identical to one already committed is not a conflict, so a
    /// batch replayed after an ambiguous failure succeeds without
    /// duplicating anything.
    async fn write_batch(&self, records: Vec<AuditRecord>) -> Result<(), StoreError>;
}

/// In-memory audit store with fault injection.
///
/// Records are write-once: a batch containing a key that already holds a
/// different record is cancelled as a whole.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    records: Mutex<HashMap<(String, String), AuditRecord>>,
    fail_at: Mutex<Option<usize>>,
}

impl InMemoryAuditStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following batch fail while staging record `index`.
    pub fn fail_at_record(&self, index: usize) {
        *self.fail_at.lock() = Some(index);
    }

    /// Removes any injected fault.
    pub fn clear_fault(&self) {
        *self.fail_at.lock() = None;
    }

    /// Returns the number of committed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing has been committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Returns the committed records of one run, ordered by index.
    #[must_use]
    pub fn records_for_run(&self, run_marker: Uuid) -> Vec<AuditRecord> {
        let mut records: Vec<_> = self
            .records
            .lock()
            .values()
            .filter(|r| r.run_marker == run_marker)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.sequence_index);
        records
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn write_batch(&self, records: Vec<AuditRecord>) -> Result<(), StoreError> {
        let fail_at = *self.fail_at.lock();
        let mut committed = self.records.lock();
        let staged = stage_batch(STORE_NAME, &committed, records, fail_at)?;
        committed.extend(staged);
        Ok(())
    }
}

/// Checks `records` against `committed` and returns the records to add.
///
/// Records identical to committed ones are skipped. A key that is already
/// committed with a different record, or that repeats within the batch,
/// cancels the whole batch, as does reaching `fail_at`.
pub(crate) fn stage_batch(
    store: &str,
    committed: &HashMap<(String, String), AuditRecord>,
    records: Vec<AuditRecord>,
    fail_at: Option<usize>,
) -> Result<HashMap<(String, String), AuditRecord>, StoreError> {
    let total = records.len();
    let mut staged = HashMap::with_capacity(total);

    for (index, record) in records.into_iter().enumerate() {
        if fail_at == Some(index) {
            return Err(StoreError::transaction_cancelled(
                store,
                index,
                total,
                "injected fault",
            ));
        }

        let key = record.table_key();
        if committed.get(&key) == Some(&record) {
            continue;
        }
        if committed.contains_key(&key) || staged.contains_key(&key) {
            return Err(StoreError::transaction_cancelled(
                store,
                index,
                total,
                format!("conditional check failed for {}/{}", key.0, key.1),
            ));
        }
        staged.insert(key, record);
    }

    Ok(staged)
}

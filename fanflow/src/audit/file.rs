//! File-backed audit store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use super::store::{stage_batch, AuditRecord, AuditStore};
use crate::errors::StoreError;
use crate::utils::{Clock, JsonFile};

const STORE_NAME: &str = "audit";

/// Audit store persisted as `audit.json` in a table directory.
///
/// Each batch is staged in memory and the file is replaced in one rename,
/// so a failed batch leaves nothing behind. Expired records are dropped
/// whenever the file is rewritten.
#[derive(Debug)]
pub struct FileAuditStore {
    file: JsonFile,
    clock: Arc<dyn Clock>,
}

impl FileAuditStore {
    /// Opens the store in `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Ok(Self {
            file: JsonFile::open(STORE_NAME, dir.as_ref(), STORE_NAME)?,
            clock,
        })
    }

    /// Returns the committed records of one run, ordered by index.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the file cannot be read.
    pub fn records_for_run(&self, run_marker: Uuid) -> Result<Vec<AuditRecord>, StoreError> {
        let records: Vec<AuditRecord> = self.file.load()?;
        let mut records: Vec<_> = records
            .into_iter()
            .filter(|r| r.run_marker == run_marker)
            .collect();
        records.sort_by_key(|r| r.sequence_index);
        Ok(records)
    }
}

#[async_trait]
impl AuditStore for FileAuditStore {
    async fn write_batch(&self, records: Vec<AuditRecord>) -> Result<(), StoreError> {
        let file = self.file.clone();
        let now = self.clock.now();

        tokio::task::spawn_blocking(move || {
            file.update(|stored: &mut Vec<AuditRecord>| {
                let mut committed: HashMap<_, _> = stored
                    .drain(..)
                    .filter(|r| r.expires_at > now)
                    .map(|r| (r.table_key(), r))
                    .collect();
                let staged = stage_batch(STORE_NAME, &committed, records, None)?;
                committed.extend(staged);

                let mut merged: Vec<_> = committed.into_values().collect();
                merged.sort_by(|a, b| a.table_key().cmp(&b.table_key()));
                *stored = merged;
                Ok(((), true))
            })
        })
        .await
        .map_err(|e| StoreError::unavailable(STORE_NAME, e.to_string()))?
    }
}

//! Claim store boundary and the in-memory implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::utils::{Clock, SystemClock};

/// Sort key shared by every dedup record.
pub const DEDUP_DATA_TYPE: &str = "dedup";

/// A persisted claim on a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRecord {
    /// Period identity.
    pub key: String,
    /// Marker of the run that made the claim.
    pub owner: Uuid,
    /// When the claim was made.
    pub claimed_at: DateTime<Utc>,
    /// When the claim stops blocking new claims.
    pub expires_at: DateTime<Utc>,
}

impl DedupRecord {
    /// Creates a new record.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        owner: Uuid,
        claimed_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            owner,
            claimed_at,
            expires_at,
        }
    }

    /// Partition and sort key of the record in the shared table.
    #[must_use]
    pub fn table_key(&self) -> (String, String) {
        (self.key.clone(), DEDUP_DATA_TYPE.to_string())
    }

    /// Returns true if the record no longer blocks a claim at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Result of a conditional create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The record was written.
    Created,
    /// A live record already holds the key.
    AlreadyExists(DedupRecord),
}

/// Conditional create-if-absent storage for dedup records.
///
/// Implementations must make the existence check and the write a single
/// atomic step: of any number of concurrent callers for the same key,
/// exactly one observes `Created`.
#[async_trait]
pub trait ClaimStore: Send + Sync + Debug {
    /// Writes `record` unless a live record already holds its key.
    async fn put_if_absent(&self, record: DedupRecord) -> Result<PutOutcome, StoreError>;
}

/// In-memory claim store.
///
/// Expired records are treated as absent by `put_if_absent` and are replaced
/// in place; [`purge_expired`](Self::purge_expired) drops them eagerly.
#[derive(Debug)]
pub struct InMemoryClaimStore {
    records: Mutex<HashMap<(String, String), DedupRecord>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryClaimStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryClaimStore {
    /// Creates an empty store that judges expiry with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Returns the number of stored records, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Looks up the record for `key`, expired or not.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<DedupRecord> {
        self.records
            .lock()
            .get(&(key.to_string(), DEDUP_DATA_TYPE.to_string()))
            .cloned()
    }

    /// Removes expired records and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, record| !record.is_expired_at(now));
        before - records.len()
    }
}

#[async_trait]
impl ClaimStore for InMemoryClaimStore {
    async fn put_if_absent(&self, record: DedupRecord) -> Result<PutOutcome, StoreError> {
        let now = self.clock.now();
        let mut records = self.records.lock();

        let table_key = record.table_key();
        if let Some(existing) = records.get(&table_key) {
            if !existing.is_expired_at(now) {
                return Ok(PutOutcome::AlreadyExists(existing.clone()));
            }
        }

        records.insert(table_key, record);
        Ok(PutOutcome::Created)
    }
}

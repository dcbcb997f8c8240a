//! File-backed claim store shared by every process on one host.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use super::store::{ClaimStore, DedupRecord, PutOutcome};
use crate::errors::StoreError;
use crate::utils::{Clock, JsonFile};

const STORE_NAME: &str = "claims";

/// Claim store persisted as `claims.json` in a table directory.
///
/// Separate invocations pointed at the same directory see each other's
/// claims; the check and the write happen under one file lock. Expired
/// claims are dropped whenever the file is rewritten.
#[derive(Debug)]
pub struct FileClaimStore {
    file: JsonFile,
    clock: Arc<dyn Clock>,
}

impl FileClaimStore {
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

    /// Reads the stored claim for `key`, expired or not.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the file cannot be read.
    pub fn get(&self, key: &str) -> Result<Option<DedupRecord>, StoreError> {
        let claims: BTreeMap<String, DedupRecord> = self.file.load()?;
        Ok(claims.get(key).cloned())
    }
}

#[async_trait]
impl ClaimStore for FileClaimStore {
    async fn put_if_absent(&self, record: DedupRecord) -> Result<PutOutcome, StoreError> {
        let file = self.file.clone();
        let now = self.clock.now();

        tokio::task::spawn_blocking(move || {
            file.update(|claims: &mut BTreeMap<String, DedupRecord>| {
                if let Some(existing) = claims.get(&record.key) {
                    if !existing.is_expired_at(now) {
                        return Ok((PutOutcome::AlreadyExists(existing.clone()), false));
                    }
                }
                claims.retain(|_, claim| !claim.is_expired_at(now));
                claims.insert(record.key.clone(), record);
                Ok((PutOutcome::Created, true))
            })
        })
        .await
        .map_err(|e| StoreError::unavailable(STORE_NAME, e.to_string()))?
    }
}

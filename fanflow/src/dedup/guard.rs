//! The dedup guard: at-most-once initiation per period.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::{ClaimStore, DedupRecord, PutOutcome};
use crate::errors::StoreError;
use crate::utils::{expires_after, Clock};

/// Outcome of a claim attempt.
///
/// A duplicate claim is an ordinary outcome, not an error; only
/// [`ClaimOutcome::StoreError`] signals a fault worth retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller won the period.
    Claimed(DedupRecord),
    /// A live claim already exists for the period.
    AlreadyClaimed(DedupRecord),
    /// The store failed; the claim state is unknown.
    StoreError(StoreError),
}

impl ClaimOutcome {
    /// Returns true if this caller won the claim.
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed(_))
    }
}

/// Guards a period key with an exclusive, expiring claim.
#[derive(Debug, Clone)]
pub struct DedupGuard {
    store: Arc<dyn ClaimStore>,
    clock: Arc<dyn Clock>,
}

impl DedupGuard {
    /// Creates a guard over `store`, timestamping claims with `clock`.
    #[must_use]
    pub fn new(store: Arc<dyn ClaimStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Attempts to claim `key` for `ttl` on behalf of `owner`.
    ///
    /// Exactly one of any number of concurrent owners for the same live key
    /// receives `Claimed`. After `ttl` the key can be claimed again.
    ///
    /// A live claim already held by `owner` is returned as `Claimed`: the
    /// store may have committed an earlier attempt whose reply was lost.
    pub async fn try_claim(&self, key: &str, owner: Uuid, ttl: Duration) -> ClaimOutcome {
        let claimed_at = self.clock.now();
        let record = DedupRecord::new(key, owner, claimed_at, expires_after(claimed_at, ttl));

        match self.store.put_if_absent(record.clone()).await {
            Ok(PutOutcome::Created) => {
                info!(key, %owner, expires_at = %record.expires_at, "Claimed period");
                ClaimOutcome::Claimed(record)
            }
            Ok(PutOutcome::AlreadyExists(existing)) if existing.owner == owner => {
                info!(key, %owner, expires_at = %existing.expires_at, "Period already held by this owner");
                ClaimOutcome::Claimed(existing)
            }
            Ok(PutOutcome::AlreadyExists(existing)) => {
                debug!(
                    key,
                    owner = %existing.owner,
                    claimed_at = %existing.claimed_at,
                    "Period already claimed"
                );
                ClaimOutcome::AlreadyClaimed(existing)
            }
            Err(error) => {
                warn!(key, error = %error, "Claim store failed");
                ClaimOutcome::StoreError(error)
            }
        }
    }
}

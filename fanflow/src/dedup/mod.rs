//! Period deduplication.
//!
//! The guard turns at-least-once triggering into at-most-once initiation:
//! every run tries to create the period's [`DedupRecord`], and only the run
//! that creates it proceeds past Init.

mod file;
mod guard;
mod store;

pub use file::FileClaimStore;
pub use guard::{ClaimOutcome, DedupGuard};
pub use store::{ClaimStore, DedupRecord, InMemoryClaimStore, PutOutcome, DEDUP_DATA_TYPE};

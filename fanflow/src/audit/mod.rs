//! Audit trail of scheduled work items.

mod file;
mod store;
mod writer;

pub use file::FileAuditStore;
pub use store::{AuditRecord, AuditStore, InMemoryAuditStore};
pub use writer::AuditWriter;

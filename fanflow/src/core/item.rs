//! Fan-out work items.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single unit of fan-out work.
///
/// Items are produced by the generator during Init and handed to the
/// fan-out executor unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    /// Formatted period label (`YYYY/MM/DD`).
    pub time_key: String,
    /// Position of the item within its run, `0..width`.
    pub sequence_index: u32,
}

impl WorkItem {
    /// Creates a new work item.
    #[must_use]
    pub fn new(time_key: impl Into<String>, sequence_index: u32) -> Self {
        Self {
            time_key: time_key.into(),
            sequence_index,
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.time_key, self.sequence_index)
    }
}

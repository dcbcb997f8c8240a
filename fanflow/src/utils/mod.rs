//! Clock, period, identifier and state file helpers.

mod clock;
mod json_file;
pub mod period;

pub use clock::{expires_after, Clock, FixedClock, SystemClock};
pub use json_file::JsonFile;
pub use period::{fixed_offset, format_time_key, Period};

use uuid::Uuid;

/// Generates a time-ordered marker for a pipeline run.
#[must_use]
pub fn generate_run_marker() -> Uuid {
    Uuid::now_v7()
}

//! Work item generation.

use chrono::{DateTime, FixedOffset};

use crate::core::WorkItem;
use crate::utils::format_time_key;

/// Default number of items generated per run.
pub const DEFAULT_FAN_OUT_WIDTH: u32 = 100;

/// Generates the fan-out items for the period containing `now`.
///
/// `now` must already be expressed in the configured offset. Every item
/// shares the same `time_key` and indices cover exactly `0..width`. The
/// function is pure: equal inputs produce equal outputs.
#[must_use]
pub fn generate(now: DateTime<FixedOffset>, width: u32) -> Vec<WorkItem> {
    let time_key = format_time_key(&now);
    (0..width)
        .map(|index| WorkItem::new(time_key.clone(), index))
        .collect()
}

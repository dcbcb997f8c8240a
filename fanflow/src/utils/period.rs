//! Period derivation.
//!
//! A period is one calendar day under a fixed UTC offset. The same instant
//! always maps to the same period, which is what makes the dedup key stable
//! across duplicate triggers.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::ConfigError;

const SECONDS_PER_HOUR: i32 = 3600;

/// Builds the fixed offset for a whole number of hours east of UTC.
///
/// # Errors
///
/// Returns `ConfigError::Invalid` when the offset is outside `-23..=23`.
pub fn fixed_offset(hours: i32) -> Result<FixedOffset, ConfigError> {
    if !(-23..=23).contains(&hours) {
        return Err(ConfigError::invalid(
            "utc_offset_hours",
            format!("{hours} is outside -23..=23"),
        ));
    }
    FixedOffset::east_opt(hours * SECONDS_PER_HOUR)
        .ok_or_else(|| ConfigError::invalid("utc_offset_hours", format!("{hours} is not a valid offset")))
}

/// Formats the period label used on work items (`YYYY/MM/DD`).
#[must_use]
pub fn format_time_key(local: &DateTime<FixedOffset>) -> String {
    local.format("%Y/%m/%d").to_string()
}

/// One calendar-day bucket in a fixed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    date: NaiveDate,
    offset_seconds: i32,
}

impl Period {
    /// Returns the period containing `now`.
    #[must_use]
    pub fn containing(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let local = now.with_timezone(&offset);
        Self {
            date: local.date_naive(),
            offset_seconds: offset.local_minus_utc(),
        }
    }

    /// The dedup key for this period (`period#YYYY-MM-DD`).
    #[must_use]
    pub fn key(&self) -> String {
        format!("period#{}", self.date.format("%Y-%m-%d"))
    }

    /// The label stamped on every work item of this period.
    #[must_use]
    pub fn time_key(&self) -> String {
        self.date.format("%Y/%m/%d").to_string()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn jst() -> FixedOffset {
        fixed_offset(9).unwrap()
    }

    #[test]
    fn test_fixed_offset_bounds() {
        assert!(fixed_offset(9).is_ok());
        assert!(fixed_offset(-23).is_ok());
        assert!(matches!(fixed_offset(24), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_period_rolls_over_at_local_midnight() {
        // 14:59 UTC is 23:59 JST on the same day
        let before = Utc.with_ymd_and_hms(2023, 12, 31, 14, 59, 59).unwrap();
        // 15:00 UTC is midnight JST on the next day
        let after = Utc.with_ymd_and_hms(2023, 12, 31, 15, 0, 0).unwrap();

        assert_eq!(Period::containing(before, jst()).time_key(), "2023/12/31");
        assert_eq!(Period::containing(after, jst()).time_key(), "2024/01/01");
    }

    #[test]
    fn test_period_key_and_label() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap();
        let period = Period::containing(now, jst());

        assert_eq!(period.key(), "period#2024-01-01");
        assert_eq!(period.time_key(), "2024/01/01");
        assert_eq!(period.to_string(), "period#2024-01-01");
    }

    #[test]
    fn test_same_day_same_period() {
        let morning = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2024, 1, 1, 14, 0, 0).unwrap();
        assert_eq!(
            Period::containing(morning, jst()),
            Period::containing(evening, jst())
        );
    }

    #[test]
    fn test_format_time_key() {
        let local = Utc
            .with_ymd_and_hms(2024, 2, 29, 20, 0, 0)
            .unwrap()
            .with_timezone(&jst());
        assert_eq!(format_time_key(&local), "2024/03/01");
    }
}

//! Pipeline configuration.
//!
//! [`PipelineConfig`] is built once at startup, validated, and then passed by
//! reference to every component. Nothing below the binary reads the
//! environment.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ConfigError;
use crate::fanout::CompletionPolicy;
use crate::generator::DEFAULT_FAN_OUT_WIDTH;
use crate::pipeline::InitRetryPolicy;
use crate::utils::fixed_offset;

/// Time bounds for each stage and for the run as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimeouts {
    /// Bound on a single Init attempt, in milliseconds.
    #[serde(default = "default_init_timeout_ms")]
    pub init_ms: u64,
    /// Bound on a single fan-out item, in milliseconds.
    #[serde(default = "default_item_timeout_ms")]
    pub item_ms: u64,
    /// Bound on the completion handler, in milliseconds.
    #[serde(default = "default_finalize_timeout_ms")]
    pub finalize_ms: u64,
    /// Bound on the whole run, in milliseconds.
    #[serde(default = "default_run_timeout_ms")]
    pub run_ms: u64,
}

fn default_init_timeout_ms() -> u64 {
    10_000
}

fn default_item_timeout_ms() -> u64 {
    60_000
}

fn default_finalize_timeout_ms() -> u64 {
    10_000
}

fn default_run_timeout_ms() -> u64 {
    24 * 60 * 60 * 1000
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            init_ms: default_init_timeout_ms(),
            item_ms: default_item_timeout_ms(),
            finalize_ms: default_finalize_timeout_ms(),
            run_ms: default_run_timeout_ms(),
        }
    }
}

impl StageTimeouts {
    /// Init attempt bound.
    #[must_use]
    pub fn init(&self) -> Duration {
        Duration::from_millis(self.init_ms)
    }

    /// Per-item bound.
    #[must_use]
    pub fn item(&self) -> Duration {
        Duration::from_millis(self.item_ms)
    }

    /// Finalize bound.
    #[must_use]
    pub fn finalize(&self) -> Duration {
        Duration::from_millis(self.finalize_ms)
    }

    /// Whole-run bound.
    #[must_use]
    pub fn run(&self) -> Duration {
        Duration::from_millis(self.run_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("timeouts.init_ms", self.init_ms),
            ("timeouts.item_ms", self.item_ms),
            ("timeouts.finalize_ms", self.finalize_ms),
            ("timeouts.run_ms", self.run_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }
        Ok(())
    }
}

/// Configuration for a pipeline deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name of the table holding dedup and audit records. Required.
    #[serde(default)]
    pub table_name: String,
    /// Offset of the period timezone, in whole hours east of UTC.
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    /// Number of work items generated per run.
    #[serde(default = "default_fan_out_width")]
    pub fan_out_width: u32,
    /// Maximum worker invocations in flight.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// What happens to in-flight workers after the first item failure.
    #[serde(default)]
    pub completion_policy: CompletionPolicy,
    /// Retry policy for the Init stage.
    #[serde(default)]
    pub init_retry: InitRetryPolicy,
    /// Stage and run time bounds.
    #[serde(default)]
    pub timeouts: StageTimeouts,
    /// Lifetime of dedup and audit records, in seconds.
    #[serde(default = "default_record_ttl_secs")]
    pub record_ttl_secs: u64,
}

fn default_utc_offset_hours() -> i32 {
    9
}

fn default_fan_out_width() -> u32 {
    DEFAULT_FAN_OUT_WIDTH
}

fn default_concurrency_limit() -> usize {
    2
}

fn default_record_ttl_secs() -> u64 {
    2 * 24 * 60 * 60
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            table_name: String::new(),
            utc_offset_hours: default_utc_offset_hours(),
            fan_out_width: default_fan_out_width(),
            concurrency_limit: default_concurrency_limit(),
            completion_policy: CompletionPolicy::default(),
            init_retry: InitRetryPolicy::default(),
            timeouts: StageTimeouts::default(),
            record_ttl_secs: default_record_ttl_secs(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults for the given table.
    #[must_use]
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Self::default()
        }
    }

    /// Sets the timezone offset.
    #[must_use]
    pub fn with_utc_offset_hours(mut self, hours: i32) -> Self {
        self.utc_offset_hours = hours;
        self
    }

    /// Sets the fan-out width.
    #[must_use]
    pub fn with_fan_out_width(mut self, width: u32) -> Self {
        self.fan_out_width = width;
        self
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Sets the completion policy.
    #[must_use]
    pub fn with_completion_policy(mut self, policy: CompletionPolicy) -> Self {
        self.completion_policy = policy;
        self
    }

    /// Sets the Init retry policy.
    #[must_use]
    pub fn with_init_retry(mut self, policy: InitRetryPolicy) -> Self {
        self.init_retry = policy;
        self
    }

    /// Sets the stage timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets the record lifetime.
    #[must_use]
    pub fn with_record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl_secs = ttl.as_secs();
        self
    }

    /// Record lifetime as a `Duration`.
    #[must_use]
    pub fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_secs)
    }

    /// The period offset. Only meaningful after [`validate`](Self::validate).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for an out-of-range offset.
    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        fixed_offset(self.utc_offset_hours)
    }

    /// Checks every field, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table_name.trim().is_empty() {
            return Err(ConfigError::Missing("table_name"));
        }
        if let Some(c) = self
            .table_name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(ConfigError::invalid(
                "table_name",
                format!("'{c}' is not allowed; use letters, digits, '_', '-' or '.'"),
            ));
        }
        self.offset()?;
        if self.fan_out_width == 0 {
            return Err(ConfigError::invalid("fan_out_width", "must be at least 1"));
        }
        if self.concurrency_limit == 0 {
            return Err(ConfigError::invalid("concurrency_limit", "must be at least 1"));
        }
        if self.record_ttl_secs == 0 {
            return Err(ConfigError::invalid("record_ttl_secs", "must be greater than zero"));
        }
        self.init_retry.validate()?;
        self.timeouts.validate()
    }
}

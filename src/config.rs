//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, DocResult};

/// Retry policy for batch commits and standalone task execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Attempts per commit, first one included. Values below 1 count as 1.
    pub max_attempts: u32,
    /// Pause between attempts, in milliseconds.
    pub retry_delay_ms: u64,
}

impl BatchConfig {
    /// Attempt ceiling, never below 1.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Pause between attempts.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 3_000,
        }
    }
}

/// Debounce timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    /// Quiet period after the last trigger before a batch commits, in milliseconds.
    pub quiet_period_ms: u64,
}

impl DebounceConfig {
    /// Default debounce delay.
    #[must_use]
    pub const fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 10_000,
        }
    }
}

/// Top-level configuration.
///
/// # Examples
///
/// ```
/// use docbatch::EngineConfig;
///
/// let config = EngineConfig::from_json(r#"{"batch": {"max_attempts": 5}}"#).unwrap();
/// assert_eq!(config.batch.max_attempts, 5);
/// assert_eq!(config.batch.retry_delay_ms, 3_000);
/// assert_eq!(config.debounce.quiet_period_ms, 10_000);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Commit retry policy.
    pub batch: BatchConfig,
    /// Debounce timing.
    pub debounce: DebounceConfig,
}

impl EngineConfig {
    /// Parses a JSON document; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidConfig` if the JSON is malformed.
    pub fn from_json(json: &str) -> DocResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            ConfigurationError::InvalidConfig {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

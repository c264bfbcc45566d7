//! Session configuration
//!
//! All knobs have defaults; a JSON document only needs the fields it changes:
//!
//! ```json
//! { "retry": { "maxAttempts": 5 }, "stall": { "thresholdTicks": 4 } }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How the delay between open attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every retry
    Fixed,
    /// Delay multiplied by the attempt number
    Linear,
}

/// Bounded retry policy for opening a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total open attempts, including the first one
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds
    pub backoff_ms: u64,
    /// Delay growth
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1000,
            backoff: Backoff::Linear,
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before the retry that follows `failed_attempts` failures,
    /// or `None` once the policy is exhausted
    pub fn delay_after(&self, failed_attempts: u32) -> Option<Duration> {
        if failed_attempts == 0 || failed_attempts >= self.max_attempts {
            return None;
        }
        let factor = match self.backoff {
            Backoff::Fixed => 1,
            Backoff::Linear => u64::from(failed_attempts),
        };
        Some(Duration::from_millis(self.backoff_ms.saturating_mul(factor)))
    }
}

/// Stall detection thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StallConfig {
    /// Consecutive non-advancing ticks before a stall is declared
    pub threshold_ticks: u32,
    /// Buffered-ahead level below which a stall may be declared
    pub low_water_ms: i64,
    /// Buffered-ahead level above which a stall is over
    pub high_water_ms: i64,
    /// Window after an explicit track change during which stalls are not counted
    pub track_change_grace_ms: u64,
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            threshold_ticks: 3,
            low_water_ms: 1000,
            high_water_ms: 3000,
            track_change_grace_ms: 2000,
        }
    }
}

/// Per-session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Rate used by `play()` until `set_speed` changes it
    pub default_rate: f64,
    /// Source-open retry policy
    pub retry: RetryPolicy,
    /// Stall detection
    pub stall: StallConfig,
    /// Emit `bufferingUpdate` events when buffered ranges change
    pub emit_buffering_updates: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_rate: 1.0,
            retry: RetryPolicy::default(),
            stall: StallConfig::default(),
            emit_buffering_updates: true,
        }
    }
}

impl SessionConfig {
    /// Parse from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !(self.default_rate.is_finite() && self.default_rate > 0.0) {
            return Err(Error::Config(format!(
                "default_rate must be positive, got {}",
                self.default_rate
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.stall.threshold_ticks == 0 {
            return Err(Error::Config("stall.threshold_ticks must be at least 1".into()));
        }
        if self.stall.high_water_ms < self.stall.low_water_ms {
            return Err(Error::Config(
                "stall.high_water_ms must not be below stall.low_water_ms".into(),
            ));
        }
        Ok(())
    }
}

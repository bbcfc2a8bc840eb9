//! Runtime configuration for the synchronization core
//!
//! Durations are serialized as integer milliseconds so a config file reads
//! naturally:
//!
//! ```json
//! {
//!   "request_timeout_ms": 10000,
//!   "notification_limit": 50,
//!   "backoff": { "initial_delay_ms": 500, "max_delay_ms": 30000 }
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FeedError, FeedResult};

/// Default page size for notification fetches
pub const DEFAULT_NOTIFICATION_LIMIT: usize = 50;

/// Default page size for announcement fetches
pub const DEFAULT_ANNOUNCEMENT_LIMIT: usize = 20;

/// Default capacity for the event broadcast channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Top-level configuration shared by every component of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound on any single remote round trip
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
    /// Maximum notifications kept in the cached list
    pub notification_limit: usize,
    /// Page size used when a filter does not set its own limit
    pub announcement_limit: usize,
    /// Capacity of the [`SyncEvent`](crate::SyncEvent) broadcast channel
    pub event_channel_capacity: usize,
    /// Reconnection policy for the push listener
    pub backoff: BackoffConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            notification_limit: DEFAULT_NOTIFICATION_LIMIT,
            announcement_limit: DEFAULT_ANNOUNCEMENT_LIMIT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            backoff: BackoffConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Parse a configuration from JSON, filling unspecified fields with defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Render the configuration as pretty-printed JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Reject configurations that would stall or spin the core
    pub fn validate(&self) -> FeedResult<()> {
        if self.request_timeout.is_zero() {
            return Err(FeedError::ValidationRejected(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.notification_limit == 0 {
            return Err(FeedError::ValidationRejected(
                "notification_limit must be greater than zero".to_string(),
            ));
        }
        if self.announcement_limit == 0 {
            return Err(FeedError::ValidationRejected(
                "announcement_limit must be greater than zero".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(FeedError::ValidationRejected(
                "event_channel_capacity must be greater than zero".to_string(),
            ));
        }
        self.backoff.validate()
    }
}

/// Exponential backoff policy with jitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,
    /// Cap applied before jitter
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// Growth factor between consecutive attempts
    pub multiplier: f64,
    /// Fraction of the delay (0.0..=1.0) that may be randomly shaved off
    pub jitter: f64,
    /// Give up after this many consecutive failures (`None` retries forever)
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: None,
        }
    }
}

impl BackoffConfig {
    fn validate(&self) -> FeedResult<()> {
        if self.initial_delay.is_zero() || self.max_delay < self.initial_delay {
            return Err(FeedError::ValidationRejected(
                "backoff requires 0 < initial_delay_ms <= max_delay_ms".to_string(),
            ));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(FeedError::ValidationRejected(
                "backoff multiplier must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(FeedError::ValidationRejected(
                "backoff jitter must be within 0.0..=1.0".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

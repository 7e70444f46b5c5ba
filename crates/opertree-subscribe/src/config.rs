//! Subscription layer configuration.

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// What a full delivery queue does with a new item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressurePolicy {
    /// Drop the new item
    #[default]
    RejectNew,
    /// Drop the oldest queued item to make room
    DropOldest,
}

impl FromStr for BackpressurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject-new" | "reject_new" => Ok(Self::RejectNew),
            "drop-oldest" | "drop_oldest" => Ok(Self::DropOldest),
            other => Err(ConfigError::Invalid {
                key: "OPERTREE_BACKPRESSURE",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for BackpressurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RejectNew => write!(f, "reject-new"),
            Self::DropOldest => write!(f, "drop-oldest"),
        }
    }
}

/// Subscription layer configuration.
#[derive(Debug, Clone)]
pub struct SubscribeConfig {
    /// Capacity of each subscription's delivery queue
    pub queue_capacity: usize,

    /// Policy applied when a queue is full
    pub backpressure: BackpressurePolicy,

    /// Gate initial sync on publisher readiness
    pub track_metadata: bool,

    /// Interval between heartbeats to idle subscribers, if enabled
    pub heartbeat_interval: Option<Duration>,

    /// Interval of the background serve loop
    pub serve_interval: Duration,
}

impl Default for SubscribeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            backpressure: BackpressurePolicy::RejectNew,
            track_metadata: false,
            heartbeat_interval: None,
            serve_interval: Duration::from_millis(50),
        }
    }
}

impl SubscribeConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `OPERTREE_QUEUE_CAPACITY`: per-subscription queue capacity
    /// - `OPERTREE_BACKPRESSURE`: "reject-new" or "drop-oldest"
    /// - `OPERTREE_TRACK_METADATA`: "true" to gate initial sync on publishers
    /// - `OPERTREE_HEARTBEAT_MS`: heartbeat interval, 0 disables
    /// - `OPERTREE_SERVE_INTERVAL_MS`: serve loop interval
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(capacity) = std::env::var("OPERTREE_QUEUE_CAPACITY") {
            config.queue_capacity = parse("OPERTREE_QUEUE_CAPACITY", &capacity)?;
        }

        if let Ok(policy) = std::env::var("OPERTREE_BACKPRESSURE") {
            config.backpressure = policy.parse()?;
        }

        if let Ok(track) = std::env::var("OPERTREE_TRACK_METADATA") {
            config.track_metadata = parse("OPERTREE_TRACK_METADATA", &track)?;
        }

        if let Ok(ms) = std::env::var("OPERTREE_HEARTBEAT_MS") {
            let ms: u64 = parse("OPERTREE_HEARTBEAT_MS", &ms)?;
            config.heartbeat_interval = (ms > 0).then(|| Duration::from_millis(ms));
        }

        if let Ok(ms) = std::env::var("OPERTREE_SERVE_INTERVAL_MS") {
            config.serve_interval = Duration::from_millis(parse("OPERTREE_SERVE_INTERVAL_MS", &ms)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns error for a zero queue capacity or serve interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "OPERTREE_QUEUE_CAPACITY",
                value: "0".to_string(),
            });
        }
        if self.serve_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "OPERTREE_SERVE_INTERVAL_MS",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A variable holds a value that cannot be used
    #[error("invalid value for {key}: {value:?}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// Offending value
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SubscribeConfig::default();
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.backpressure, BackpressurePolicy::RejectNew);
        assert!(config.heartbeat_interval.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn backpressure_parsing() {
        assert_eq!(
            "drop-oldest".parse::<BackpressurePolicy>().unwrap(),
            BackpressurePolicy::DropOldest
        );
        assert_eq!(
            "Reject_New".parse::<BackpressurePolicy>().unwrap(),
            BackpressurePolicy::RejectNew
        );
        assert!("block".parse::<BackpressurePolicy>().is_err());
    }

    #[test]
    fn zero_capacity_rejected() {
        let config = SubscribeConfig {
            queue_capacity: 0,
            ..SubscribeConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

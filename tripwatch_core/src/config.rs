//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::TripError;
use crate::geofence::DEFAULT_REGION_RADIUS_M;
use crate::retry::{
    RetryPolicy, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_DELAY_SECS,
};

/// What happens when the vehicle enters the destination zone while an
/// inspection is still outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Arrival counts as confirmation: both flags are forced true and the
    /// trip is delivered.
    #[default]
    ImplicitConfirm,
    /// Arrival is remembered; delivery waits until both inspections are
    /// completed while still inside the destination zone.
    RequireInspections,
}

/// Serializable form of [`RetryPolicy::ExponentialBackoff`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts including the first (1 = no retry)
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_SECS * 1000,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        if self.max_attempts <= 1 {
            return RetryPolicy::None;
        }
        RetryPolicy::ExponentialBackoff {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
        }
    }
}

/// Configuration for a trip session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Geofence radius in metres (default: 50)
    pub region_radius_m: f64,

    /// Timer tick interval in seconds (default: 60)
    pub tick_interval_secs: u64,

    /// Elapsed time after which a delay alert fires (default: 3600 = 1h)
    pub max_allowed_duration_secs: u64,

    /// Average speed used for the ETA heuristic (default: 40 km/h)
    pub average_speed_kmh: f64,

    /// ETA used when the trip distance cannot be parsed (default: 3600 = 1h)
    pub default_trip_duration_secs: u64,

    /// Remaining time under which "approaching destination" fires (default: 600)
    pub near_arrival_window_secs: u64,

    /// Destination arrival with outstanding inspections (default: implicit confirm)
    pub delivery_policy: DeliveryPolicy,

    /// Retry budget for trip writes
    pub write_retry: RetryConfig,

    /// Retry budget for notification rows
    pub notification_retry: RetryConfig,

    /// Capacity of the session event queue and outbound write queues (default: 256)
    pub queue_capacity: usize,

    /// Capacity of the alert/snapshot broadcast channels (default: 64)
    pub broadcast_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            region_radius_m: DEFAULT_REGION_RADIUS_M,
            tick_interval_secs: 60,
            max_allowed_duration_secs: 60 * 60,
            average_speed_kmh: 40.0,
            default_trip_duration_secs: 60 * 60,
            near_arrival_window_secs: 10 * 60,
            delivery_policy: DeliveryPolicy::ImplicitConfirm,
            write_retry: RetryConfig::default(),
            notification_retry: RetryConfig::default(),
            queue_capacity: 256,
            broadcast_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// Parses a JSON document; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, TripError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TripError::validation(format!("invalid engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the engine cannot work with.
    pub fn validate(&self) -> Result<(), TripError> {
        if !(self.region_radius_m.is_finite() && self.region_radius_m > 0.0) {
            return Err(TripError::validation("region_radius_m must be positive"));
        }
        if self.tick_interval_secs == 0 {
            return Err(TripError::validation("tick_interval_secs must be non-zero"));
        }
        if !(self.average_speed_kmh.is_finite() && self.average_speed_kmh > 0.0) {
            return Err(TripError::validation("average_speed_kmh must be positive"));
        }
        if self.queue_capacity == 0 || self.broadcast_capacity == 0 {
            return Err(TripError::validation("channel capacities must be non-zero"));
        }
        Ok(())
    }

    pub fn with_delivery_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.delivery_policy = policy;
        self
    }

    pub fn with_region_radius(mut self, metres: f64) -> Self {
        self.region_radius_m = metres;
        self
    }

    pub fn with_write_retry(mut self, retry: RetryConfig) -> Self {
        self.write_retry = retry;
        self
    }

    pub fn with_notification_retry(mut self, retry: RetryConfig) -> Self {
        self.notification_retry = retry;
        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn max_allowed_duration(&self) -> Duration {
        Duration::from_secs(self.max_allowed_duration_secs)
    }

    pub fn default_trip_duration(&self) -> Duration {
        Duration::from_secs(self.default_trip_duration_secs)
    }

    pub fn near_arrival_window(&self) -> Duration {
        Duration::from_secs(self.near_arrival_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.region_radius_m, 50.0);
        assert_eq!(config.tick_interval(), Duration::from_secs(60));
        assert_eq!(config.max_allowed_duration(), Duration::from_secs(3600));
        assert_eq!(config.delivery_policy, DeliveryPolicy::ImplicitConfirm);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json(
            r#"{ "delivery_policy": "require_inspections", "write_retry": { "max_attempts": 8 } }"#,
        )
        .unwrap();

        assert_eq!(config.delivery_policy, DeliveryPolicy::RequireInspections);
        assert_eq!(config.write_retry.max_attempts, 8);
        assert_eq!(config.write_retry.initial_delay_ms, 100);
        assert_eq!(config.tick_interval_secs, 60);
    }

    #[test]
    fn test_from_json_rejects_bad_values() {
        assert!(EngineConfig::from_json(r#"{ "tick_interval_secs": 0 }"#).is_err());
        assert!(EngineConfig::from_json(r#"{ "region_radius_m": -5 }"#).is_err());
        assert!(EngineConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_retry_config_policy() {
        let retry = RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        };
        assert_eq!(retry.policy(), RetryPolicy::None);
        assert_eq!(RetryConfig::default().policy(), RetryPolicy::exponential(5));
    }
}

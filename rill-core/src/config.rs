//! Runtime Configuration
//!
//! Per-session knobs. A config can be built in code or loaded from JSON;
//! missing fields fall back to their defaults.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for a [`Runtime`](crate::reactive::Runtime) session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Flush immediately after a write, observer creation, explicit
    /// invalidation or timer firing that happens outside any evaluation
    /// and outside a batch.
    pub auto_flush: bool,

    /// Honor the equality predicate of cells. When false every write
    /// invalidates dependents.
    pub skip_equal_writes: bool,

    /// Record node transitions into the diagnostic event log.
    pub record_events: bool,

    /// Maximum number of events kept; the oldest are dropped first.
    pub event_log_capacity: usize,

    /// Upper bound on observer runs within a single flush.
    pub max_observer_runs_per_flush: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            auto_flush: true,
            skip_equal_writes: true,
            record_events: false,
            event_log_capacity: 1024,
            max_observer_runs_per_flush: 10_000,
        }
    }
}

impl RuntimeConfig {
    /// Parse a config from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the numeric limits are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_log_capacity == 0 {
            return Err(ConfigError::Zero { field: "event_log_capacity" });
        }
        if self.max_observer_runs_per_flush == 0 {
            return Err(ConfigError::Zero { field: "max_observer_runs_per_flush" });
        }
        Ok(())
    }

    /// Manual flushing: writes only queue observers.
    pub fn manual_flush() -> Self {
        Self {
            auto_flush: false,
            ..Self::default()
        }
    }

    pub fn with_events(mut self) -> Self {
        self.record_events = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert!(config.auto_flush);
        assert!(config.skip_equal_writes);
        assert!(!config.record_events);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config = RuntimeConfig::from_json(r#"{"auto_flush": false, "record_events": true}"#)
            .unwrap();
        assert!(!config.auto_flush);
        assert!(config.record_events);
        assert_eq!(config.event_log_capacity, 1024);
    }

    #[test]
    fn rejects_zero_limits() {
        let err = RuntimeConfig::from_json(r#"{"max_observer_runs_per_flush": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Zero { field: "max_observer_runs_per_flush" }));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            RuntimeConfig::from_json("{auto_flush"),
            Err(ConfigError::Parse(_))
        ));
    }
}

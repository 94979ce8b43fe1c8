//! Node configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a timer node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Prefix for every key and channel the node uses.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Maximum number of events claimed per poll.
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    /// How long initialization may take before the node is marked failed.
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    /// How long a delivered event stays leased before it is retried.
    #[serde(default = "default_lease_duration_ms")]
    pub lease_duration_ms: u64,
    /// Poll delay after a failed update.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Shortest interval between polls.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Longest interval between polls, used when nothing is scheduled.
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
    /// Capacity of the notification channel handed to the consumer.
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

fn default_namespace() -> String {
    "dtimer".to_string()
}

fn default_max_events() -> usize {
    8
}

fn default_ready_timeout_ms() -> u64 {
    30_000
}

fn default_lease_duration_ms() -> u64 {
    10_000
}

fn default_backoff_ms() -> u64 {
    3_000
}

fn default_min_interval_ms() -> u64 {
    10
}

fn default_idle_interval_ms() -> u64 {
    3_000
}

fn default_notification_capacity() -> usize {
    1024
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            max_events: default_max_events(),
            ready_timeout_ms: default_ready_timeout_ms(),
            lease_duration_ms: default_lease_duration_ms(),
            backoff_ms: default_backoff_ms(),
            min_interval_ms: default_min_interval_ms(),
            idle_interval_ms: default_idle_interval_ms(),
            notification_capacity: default_notification_capacity(),
        }
    }
}

impl NodeConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the per-poll claim cap. Zero keeps the default.
    pub fn with_max_events(mut self, max_events: usize) -> Self {
        if max_events > 0 {
            self.max_events = max_events;
        }
        self
    }

    /// Set the initialization timeout.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the lease duration.
    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration_ms = lease.as_millis() as u64;
        self
    }

    /// Set the failure backoff.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Set the poll interval bounds.
    pub fn with_interval_bounds(mut self, min: Duration, idle: Duration) -> Self {
        self.min_interval_ms = min.as_millis() as u64;
        self.idle_interval_ms = idle.as_millis() as u64;
        self
    }

    /// Set the notification channel capacity.
    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn interval_bounds(&self) -> IntervalBounds {
        IntervalBounds::new(self.min_interval_ms, self.idle_interval_ms)
    }
}

/// Clamp applied to every computed poll interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalBounds {
    pub floor_ms: u64,
    pub ceiling_ms: u64,
}

impl IntervalBounds {
    pub fn new(floor_ms: u64, ceiling_ms: u64) -> Self {
        Self {
            floor_ms,
            ceiling_ms: ceiling_ms.max(floor_ms),
        }
    }

    /// Milliseconds from `now` until `horizon`, clamped. The ceiling applies
    /// when nothing is scheduled.
    pub fn interval(&self, horizon: Option<i64>, now: i64) -> u64 {
        match horizon {
            Some(at) => {
                let wait = at.saturating_sub(now).max(0) as u64;
                wait.clamp(self.floor_ms, self.ceiling_ms)
            }
            None => self.ceiling_ms,
        }
    }
}

impl Default for IntervalBounds {
    fn default() -> Self {
        Self::new(default_min_interval_ms(), default_idle_interval_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.namespace, "dtimer");
        assert_eq!(cfg.max_events, 8);
        assert_eq!(cfg.ready_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.lease_duration_ms, 10_000);
        assert_eq!(cfg.backoff(), Duration::from_secs(3));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: NodeConfig =
            serde_json::from_str(r#"{"namespace": "jobs", "maxEvents": 2}"#).unwrap();
        assert_eq!(cfg.namespace, "jobs");
        // field names are snake_case; unknown keys are ignored
        assert_eq!(cfg.max_events, 8);

        let cfg: NodeConfig = serde_json::from_str(r#"{"max_events": 2}"#).unwrap();
        assert_eq!(cfg.max_events, 2);
        assert_eq!(cfg.idle_interval_ms, 3_000);
    }

    #[test]
    fn test_zero_max_events_keeps_default() {
        assert_eq!(NodeConfig::new().with_max_events(0).max_events, 8);
        assert_eq!(NodeConfig::new().with_max_events(3).max_events, 3);
    }

    #[test]
    fn test_interval_clamp() {
        let bounds = IntervalBounds::new(10, 3_000);
        assert_eq!(bounds.interval(None, 1_000), 3_000);
        assert_eq!(bounds.interval(Some(1_000), 1_000), 10);
        assert_eq!(bounds.interval(Some(500), 1_000), 10);
        assert_eq!(bounds.interval(Some(1_250), 1_000), 250);
        assert_eq!(bounds.interval(Some(100_000), 1_000), 3_000);
    }
}

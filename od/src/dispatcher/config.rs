//! Dispatcher configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Dispatcher configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Max instances running tasks at once (0 = unbounded)
    #[serde(rename = "global-parallel-limit", default)]
    pub global_parallel_limit: usize,

    /// Max concurrent tasks on one instance (0 = unbounded)
    #[serde(rename = "per-instance-parallel-limit", default)]
    pub per_instance_parallel_limit: usize,

    /// Seconds an instance stays blocked before reinstatement
    #[serde(rename = "quarantine-secs", default = "default_quarantine_secs")]
    pub quarantine_secs: u64,
}

fn default_quarantine_secs() -> u64 {
    20 * 60
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            global_parallel_limit: 0,
            per_instance_parallel_limit: 0,
            quarantine_secs: default_quarantine_secs(),
        }
    }
}

impl DispatcherConfig {
    /// Get the quarantine period as a Duration
    pub fn quarantine_duration(&self) -> Duration {
        Duration::from_secs(self.quarantine_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DispatcherConfig::default();
        assert_eq!(config.global_parallel_limit, 0);
        assert_eq!(config.per_instance_parallel_limit, 0);
        assert_eq!(config.quarantine_secs, 1200);
    }

    #[test]
    fn test_quarantine_duration() {
        let config = DispatcherConfig {
            quarantine_secs: 90,
            ..Default::default()
        };
        assert_eq!(config.quarantine_duration(), Duration::from_secs(90));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: DispatcherConfig = serde_yaml::from_str("global-parallel-limit: 3\n").unwrap();
        assert_eq!(config.global_parallel_limit, 3);
        assert_eq!(config.per_instance_parallel_limit, 0);
        assert_eq!(config.quarantine_secs, 1200);
    }
}

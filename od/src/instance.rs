//! Instance identity and life-cycle state

use std::fmt;

use serde::{Deserialize, Serialize};

/// Life-cycle state of an instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Idle, may receive a new task
    #[default]
    Ready,

    /// Hosting one or more tasks
    Running,

    /// Quarantined, receives nothing until reinstated
    Blocked,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Blocked => "blocked",
        };
        write!(f, "{}", s)
    }
}

/// Position of an instance within its registry
///
/// Instances are never removed, so the index is stable for the registry's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub(crate) usize);

impl InstanceId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Handle to a registered instance
///
/// This is what work receives and what callers pass back to quarantine an
/// instance. It carries identity only; live state is read through the
/// dispatcher because other tasks may change it at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instance {
    id: InstanceId,
    address: String,
}

impl Instance {
    pub(crate) fn new(id: InstanceId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// Point-in-time view of an instance, taken under the dispatcher lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub address: String,
    pub state: InstanceState,
    pub active_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_ready() {
        assert_eq!(InstanceState::default(), InstanceState::Ready);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(InstanceState::Ready.to_string(), "ready");
        assert_eq!(InstanceState::Running.to_string(), "running");
        assert_eq!(InstanceState::Blocked.to_string(), "blocked");
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&InstanceState::Blocked).unwrap();
        assert_eq!(json, "\"blocked\"");
    }

    #[test]
    fn test_instance_display_is_address() {
        let instance = Instance::new(InstanceId(3), "10.0.0.7");
        assert_eq!(instance.to_string(), "10.0.0.7");
        assert_eq!(instance.id().index(), 3);
    }
}

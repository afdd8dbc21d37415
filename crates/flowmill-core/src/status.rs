// Node and execution status state machine
//
// The same status set covers individual nodes and the execution aggregate;
// wire and database representations use the SCREAMING_SNAKE_CASE strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle states for a workflow node (and the execution aggregate)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    /// Waiting for dependencies
    Pending,
    /// Currently executing
    Running,
    /// Successfully finished
    Completed,
    /// Execution failed
    Failed,
    /// Manually stopped
    Cancelled,
    /// Condition evaluated to false
    Skipped,
}

impl NodeStatus {
    /// Wire/database string for this status
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "PENDING",
            NodeStatus::Running => "RUNNING",
            NodeStatus::Completed => "COMPLETED",
            NodeStatus::Failed => "FAILED",
            NodeStatus::Cancelled => "CANCELLED",
            NodeStatus::Skipped => "SKIPPED",
        }
    }

    /// Terminal states are absorbing: no further transitions are legal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Cancelled | NodeStatus::Skipped
        )
    }

    /// Whether a transition from `self` to `target` is allowed
    pub fn can_transition_to(&self, target: NodeStatus) -> bool {
        match self {
            NodeStatus::Pending => matches!(
                target,
                NodeStatus::Running | NodeStatus::Cancelled | NodeStatus::Skipped
            ),
            NodeStatus::Running => matches!(
                target,
                NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Cancelled
            ),
            _ => false,
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(NodeStatus::Pending),
            "RUNNING" => Ok(NodeStatus::Running),
            "COMPLETED" => Ok(NodeStatus::Completed),
            "FAILED" => Ok(NodeStatus::Failed),
            "CANCELLED" => Ok(NodeStatus::Cancelled),
            "SKIPPED" => Ok(NodeStatus::Skipped),
            other => Err(format!("unknown node status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_transitions() {
        assert!(NodeStatus::Pending.can_transition_to(NodeStatus::Running));
        assert!(NodeStatus::Pending.can_transition_to(NodeStatus::Cancelled));
        assert!(NodeStatus::Pending.can_transition_to(NodeStatus::Skipped));
        assert!(!NodeStatus::Pending.can_transition_to(NodeStatus::Completed));
        assert!(!NodeStatus::Pending.can_transition_to(NodeStatus::Failed));
    }

    #[test]
    fn test_running_transitions() {
        assert!(NodeStatus::Running.can_transition_to(NodeStatus::Completed));
        assert!(NodeStatus::Running.can_transition_to(NodeStatus::Failed));
        assert!(NodeStatus::Running.can_transition_to(NodeStatus::Cancelled));
        assert!(!NodeStatus::Running.can_transition_to(NodeStatus::Pending));
        assert!(!NodeStatus::Running.can_transition_to(NodeStatus::Skipped));
    }

    #[test]
    fn test_terminal_states_absorb() {
        for terminal in [
            NodeStatus::Completed,
            NodeStatus::Failed,
            NodeStatus::Cancelled,
            NodeStatus::Skipped,
        ] {
            assert!(terminal.is_terminal());
            for target in [
                NodeStatus::Pending,
                NodeStatus::Running,
                NodeStatus::Completed,
                NodeStatus::Failed,
                NodeStatus::Cancelled,
                NodeStatus::Skipped,
            ] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn test_string_round_trip() {
        for status in [
            NodeStatus::Pending,
            NodeStatus::Running,
            NodeStatus::Completed,
            NodeStatus::Failed,
            NodeStatus::Cancelled,
            NodeStatus::Skipped,
        ] {
            assert_eq!(status.as_str().parse::<NodeStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<NodeStatus>().is_err());
    }

    #[test]
    fn test_serde_uses_wire_strings() {
        let json = serde_json::to_string(&NodeStatus::Running).unwrap();
        assert_eq!(json, "\"RUNNING\"");
        let back: NodeStatus = serde_json::from_str("\"SKIPPED\"").unwrap();
        assert_eq!(back, NodeStatus::Skipped);
    }
}

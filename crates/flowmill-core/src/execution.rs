// Execution aggregate: one run of a workflow
//
// Node status changes go through `transition_to` so illegal transitions
// surface as InvalidTransition instead of silently corrupting state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{Result, WorkflowError};
use crate::status::NodeStatus;

/// Per-node runtime state within an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    pub node_id: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl NodeExecution {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Pending,
            output: Value::Object(serde_json::Map::new()),
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply a guarded status transition, stamping timestamps
    pub fn transition_to(&mut self, target: NodeStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(WorkflowError::InvalidTransition {
                node_id: self.node_id.clone(),
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        match target {
            NodeStatus::Running => self.started_at = Some(Utc::now()),
            NodeStatus::Completed | NodeStatus::Failed => self.completed_at = Some(Utc::now()),
            _ => {}
        }
        Ok(())
    }
}

/// Aggregate root for a single workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub workflow_id: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub node_states: BTreeMap<String, NodeExecution>,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn new(workflow_id: impl Into<String>, timeout_seconds: Option<f64>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            status: NodeStatus::Pending,
            node_states: BTreeMap::new(),
            params: Value::Object(serde_json::Map::new()),
            timeout_seconds,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Seed a PENDING NodeExecution for each DAG node
    pub fn initialize_nodes(&mut self, node_ids: impl IntoIterator<Item = String>) {
        for node_id in node_ids {
            self.node_states
                .insert(node_id.clone(), NodeExecution::new(node_id));
        }
    }

    pub fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        self.node_states.get(node_id).map(|n| n.status)
    }

    pub fn set_node_running(&mut self, node_id: &str) -> Result<()> {
        self.node_mut(node_id)?.transition_to(NodeStatus::Running)?;
        if self.status == NodeStatus::Pending {
            self.status = NodeStatus::Running;
            self.started_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn set_node_completed(&mut self, node_id: &str, output: Value) -> Result<()> {
        let node = self.node_mut(node_id)?;
        node.transition_to(NodeStatus::Completed)?;
        node.output = output;
        Ok(())
    }

    pub fn set_node_failed(&mut self, node_id: &str, error: impl Into<String>) -> Result<()> {
        let node = self.node_mut(node_id)?;
        node.transition_to(NodeStatus::Failed)?;
        node.error = Some(error.into());
        self.status = NodeStatus::Failed;
        Ok(())
    }

    /// True if the node is PENDING and every dependency is COMPLETED
    pub fn is_node_ready(&self, node_id: &str, dependencies: &[String]) -> bool {
        if self.node_status(node_id) != Some(NodeStatus::Pending) {
            return false;
        }
        dependencies
            .iter()
            .all(|dep| self.node_status(dep) == Some(NodeStatus::Completed))
    }

    pub fn all_nodes_complete(&self) -> bool {
        self.node_states
            .values()
            .all(|n| n.status == NodeStatus::Completed)
    }

    pub fn has_failed(&self) -> bool {
        self.node_states
            .values()
            .any(|n| n.status == NodeStatus::Failed)
    }

    /// Outputs of completed nodes, keyed by node id
    pub fn outputs(&self) -> BTreeMap<String, Value> {
        self.node_states
            .iter()
            .filter(|(_, n)| n.status == NodeStatus::Completed)
            .map(|(id, n)| (id.clone(), n.output.clone()))
            .collect()
    }

    pub fn mark_complete(&mut self) {
        self.status = NodeStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Cancel the run: PENDING/RUNNING nodes transition to CANCELLED
    pub fn cancel(&mut self) -> Result<()> {
        self.status = NodeStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        for node in self.node_states.values_mut() {
            if matches!(node.status, NodeStatus::Pending | NodeStatus::Running) {
                node.transition_to(NodeStatus::Cancelled)?;
            }
        }
        Ok(())
    }

    fn node_mut(&mut self, node_id: &str) -> Result<&mut NodeExecution> {
        self.node_states
            .get_mut(node_id)
            .ok_or_else(|| WorkflowError::InvalidWorkflow(format!("unknown node '{node_id}'")))
    }
}

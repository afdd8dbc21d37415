// Status query use case
//
// Reads the hot path first (sub-millisecond, no cold-store hit); falls back
// to the cold store and derives the aggregate when the hot shadow expired.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use flowmill_core::{ExecutionRepository, NodeStatus, Result, StateStore, WorkflowError};

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStatusView {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: NodeStatus,
    pub node_statuses: HashMap<String, NodeStatus>,
}

pub struct GetWorkflowStatus {
    executions: Arc<dyn ExecutionRepository>,
    state: Arc<dyn StateStore>,
}

impl GetWorkflowStatus {
    pub fn new(executions: Arc<dyn ExecutionRepository>, state: Arc<dyn StateStore>) -> Self {
        Self { executions, state }
    }

    pub async fn execute(&self, execution_id: &str) -> Result<ExecutionStatusView> {
        let aggregate = self.state.aggregate_status(execution_id).await?;
        let metadata = self.state.execution_metadata(execution_id).await?;
        let node_statuses = self.state.all_node_statuses(execution_id).await?;

        if let (Some(status), Some(metadata)) = (aggregate, metadata) {
            return Ok(ExecutionStatusView {
                execution_id: execution_id.to_string(),
                workflow_id: metadata.workflow_id,
                status,
                node_statuses,
            });
        }

        let execution = self
            .executions
            .get_by_id(execution_id)
            .await?
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))?;

        let all_completed = !node_statuses.is_empty()
            && node_statuses.values().all(|s| *s == NodeStatus::Completed);
        let any_failed = node_statuses.values().any(|s| *s == NodeStatus::Failed);
        let any_running = node_statuses.values().any(|s| *s == NodeStatus::Running);

        let status = if execution.status == NodeStatus::Cancelled {
            NodeStatus::Cancelled
        } else if any_failed {
            NodeStatus::Failed
        } else if all_completed {
            NodeStatus::Completed
        } else if any_running {
            NodeStatus::Running
        } else {
            NodeStatus::Pending
        };

        Ok(ExecutionStatusView {
            execution_id: execution_id.to_string(),
            workflow_id: execution.workflow_id,
            status,
            node_statuses,
        })
    }
}

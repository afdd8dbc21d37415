// Results query use case
//
// Aggregates output data from completed nodes. Outputs live only in the hot
// store and expire with its TTL; a run queried after expiry returns an empty
// map even though the execution row persists.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use flowmill_core::{ExecutionRepository, Result, StateStore, WorkflowError};

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResultsView {
    pub execution_id: String,
    pub workflow_id: String,
    pub outputs: HashMap<String, Value>,
}

pub struct GetWorkflowResults {
    executions: Arc<dyn ExecutionRepository>,
    state: Arc<dyn StateStore>,
}

impl GetWorkflowResults {
    pub fn new(executions: Arc<dyn ExecutionRepository>, state: Arc<dyn StateStore>) -> Self {
        Self { executions, state }
    }

    pub async fn execute(&self, execution_id: &str) -> Result<ExecutionResultsView> {
        let execution = self
            .executions
            .get_by_id(execution_id)
            .await?
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))?;

        let outputs = self.state.all_outputs(execution_id).await?;

        Ok(ExecutionResultsView {
            execution_id: execution_id.to_string(),
            workflow_id: execution.workflow_id,
            outputs,
        })
    }
}

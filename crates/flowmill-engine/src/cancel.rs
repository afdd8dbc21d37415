// Cancel use case
//
// Cancels an active execution in the cold store, then mirrors the aggregate
// and per-node statuses into the hot store so no further work dispatches and
// late completions are discarded by the orchestrator's terminal check.

use std::sync::Arc;

use flowmill_core::{ExecutionRepository, Result, StateStore, WorkflowError};

pub struct CancelWorkflow {
    executions: Arc<dyn ExecutionRepository>,
    state: Arc<dyn StateStore>,
}

impl CancelWorkflow {
    pub fn new(executions: Arc<dyn ExecutionRepository>, state: Arc<dyn StateStore>) -> Self {
        Self { executions, state }
    }

    pub async fn execute(&self, execution_id: &str) -> Result<()> {
        let mut execution = self
            .executions
            .get_by_id(execution_id)
            .await?
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))?;

        // The cold-store row carries no node states; reconstruct from the hot
        // map so active nodes get swept to CANCELLED.
        let node_statuses = self.state.all_node_statuses(execution_id).await?;
        execution.initialize_nodes(node_statuses.keys().cloned());
        for (node_id, status) in &node_statuses {
            if let Some(node) = execution.node_states.get_mut(node_id) {
                node.status = *status;
            }
        }

        execution.cancel()?;
        self.executions.update(&execution).await?;

        self.state
            .set_aggregate_status(execution_id, execution.status)
            .await?;
        for (node_id, node) in &execution.node_states {
            self.state
                .set_node_status(execution_id, node_id, node.status)
                .await?;
        }

        tracing::info!(execution_id = %execution_id, "execution cancelled");
        Ok(())
    }
}

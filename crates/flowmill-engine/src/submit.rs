// Submit use case
//
// Validates the DAG, persists the definition and initial execution to the
// cold store, then seeds the hot state so the orchestrator can progress the
// run without touching the cold store.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::sync::Arc;

use flowmill_core::{
    Dag, Execution, ExecutionMetadata, ExecutionRepository, NodeStatus, Result, StateStore,
    Workflow, WorkflowRepository,
};

pub struct SubmitWorkflow {
    workflows: Arc<dyn WorkflowRepository>,
    executions: Arc<dyn ExecutionRepository>,
    state: Arc<dyn StateStore>,
}

impl SubmitWorkflow {
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        executions: Arc<dyn ExecutionRepository>,
        state: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            workflows,
            executions,
            state,
        }
    }

    /// Validate and persist a workflow; returns (workflow_id, execution_id)
    pub async fn execute(
        &self,
        name: &str,
        dag_json: Value,
        timeout_seconds: Option<f64>,
    ) -> Result<(String, String)> {
        let dag = Dag::from_value(&dag_json)?;

        let workflow = Workflow::new(name, dag_json);
        self.workflows.save(&workflow).await?;

        let mut execution = Execution::new(&workflow.id, timeout_seconds);
        execution.initialize_nodes(dag.nodes().keys().cloned());
        self.executions.save(&execution).await?;

        let mut metadata = ExecutionMetadata::new(&workflow.id);
        if let Some(timeout) = timeout_seconds {
            metadata.timeout_at =
                Some(Utc::now() + ChronoDuration::milliseconds((timeout * 1000.0) as i64));
        }
        self.state
            .set_execution_metadata(&execution.id, &metadata)
            .await?;
        self.state
            .set_aggregate_status(&execution.id, NodeStatus::Pending)
            .await?;

        for node_id in dag.nodes().keys() {
            self.state
                .set_node_status(&execution.id, node_id, NodeStatus::Pending)
                .await?;
        }

        tracing::info!(
            workflow_id = %workflow.id,
            execution_id = %execution.id,
            nodes = dag.len(),
            "workflow submitted"
        );

        Ok((workflow.id, execution.id))
    }
}

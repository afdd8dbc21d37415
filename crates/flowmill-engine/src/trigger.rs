// Trigger use case
//
// Starts a pending execution: publishes a task for every root node (no
// dependencies) and bootstraps the hot metadata the orchestrator reads on
// every completion. Trigger is once-only; re-triggering a non-pending
// execution republishes nothing through the status guard but callers should
// not rely on it.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

use flowmill_core::{
    Dag, ExecutionMetadata, ExecutionRepository, MessageBroker, NodeStatus, Result, StateStore,
    TaskMessage, TemplateResolver, WorkflowError, WorkflowRepository,
};

pub struct TriggerExecution {
    workflows: Arc<dyn WorkflowRepository>,
    executions: Arc<dyn ExecutionRepository>,
    state: Arc<dyn StateStore>,
    broker: Arc<dyn MessageBroker>,
}

impl TriggerExecution {
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        executions: Arc<dyn ExecutionRepository>,
        state: Arc<dyn StateStore>,
        broker: Arc<dyn MessageBroker>,
    ) -> Self {
        Self {
            workflows,
            executions,
            state,
            broker,
        }
    }

    pub async fn execute(&self, execution_id: &str, params: Option<Value>) -> Result<()> {
        let mut execution = self
            .executions
            .get_by_id(execution_id)
            .await?
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))?;

        let workflow = self
            .workflows
            .get_by_id(&execution.workflow_id)
            .await?
            .ok_or_else(|| {
                WorkflowError::InvalidWorkflow(format!(
                    "workflow {} not found",
                    execution.workflow_id
                ))
            })?;

        let dag = Dag::from_value(&workflow.dag_json)?;

        // Runtime parameters join the outputs map so root configs can
        // reference {{ params.<key> }}
        if let Some(params) = params {
            self.state
                .set_node_output(execution_id, "params", &params)
                .await?;
        }

        let root_nodes = dag.root_nodes();
        let outputs = self.state.all_outputs(execution_id).await?;

        if !root_nodes.is_empty() && execution.status == NodeStatus::Pending {
            execution.status = NodeStatus::Running;
            execution.started_at = Some(Utc::now());
            self.executions.update(&execution).await?;
        }

        for node_id in &root_nodes {
            let node = match dag.node(node_id) {
                Some(node) => node,
                None => continue,
            };
            let resolved_config = TemplateResolver::resolve_config(&node.config, &outputs);
            let task = TaskMessage::new(execution_id, node_id, &node.handler, resolved_config);

            self.state
                .set_node_status(execution_id, node_id, NodeStatus::Running)
                .await?;
            self.broker.publish_task(&task).await?;

            tracing::info!(
                execution_id = %execution_id,
                node_id = %node_id,
                handler = %node.handler,
                "root task published"
            );
        }

        self.state
            .set_aggregate_status(execution_id, NodeStatus::Running)
            .await?;
        self.state
            .set_execution_metadata(
                execution_id,
                &ExecutionMetadata {
                    workflow_id: execution.workflow_id.clone(),
                    started_at: execution.started_at,
                    timeout_seconds: execution.timeout_seconds,
                    timeout_at: None,
                },
            )
            .await?;

        Ok(())
    }
}

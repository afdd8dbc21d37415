// Orchestrate use case
//
// Reacts to task completions, resolves data-flow dependencies, and dispatches
// newly-ready tasks. Readiness is a pure function of the persisted status
// map, so completions may be handled in any order; the per-node dispatch lock
// is the only mutual exclusion on the critical path and exists for fan-in:
// when several parents of a join node complete concurrently, their completion
// handlers race to dispatch it, and only one may enter the critical region.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use flowmill_core::{
    CompletionMessage, Dag, Execution, ExecutionRepository, MessageBroker, NodeStatus, Result,
    StateStore, TaskMessage, TemplateResolver, WorkflowRepository,
};

use crate::dag_cache::DagCache;

/// Tuning for the orchestrator use case
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub lock_ttl: Duration,
    pub dag_cache_max_size: u64,
    pub dag_cache_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(30),
            dag_cache_max_size: 256,
            dag_cache_ttl: Duration::from_secs(300),
        }
    }
}

pub struct Orchestrator {
    workflows: Arc<dyn WorkflowRepository>,
    executions: Arc<dyn ExecutionRepository>,
    state: Arc<dyn StateStore>,
    broker: Arc<dyn MessageBroker>,
    dag_cache: DagCache,
    lock_ttl: Duration,
}

impl Orchestrator {
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        executions: Arc<dyn ExecutionRepository>,
        state: Arc<dyn StateStore>,
        broker: Arc<dyn MessageBroker>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            workflows,
            executions,
            state,
            broker,
            dag_cache: DagCache::new(config.dag_cache_max_size, config.dag_cache_ttl),
            lock_ttl: config.lock_ttl,
        }
    }

    /// Process a task completion: update hot state, propagate failures,
    /// dispatch whatever became ready.
    ///
    /// Completions for already-terminal executions are dropped; the caller
    /// still acks them, otherwise the pending-entry list grows without bound
    /// on stuck executions.
    pub async fn handle_completion(&self, completion: &CompletionMessage) -> Result<()> {
        let aggregate = self.state.aggregate_status(&completion.execution_id).await?;
        if matches!(
            aggregate,
            Some(NodeStatus::Cancelled) | Some(NodeStatus::Failed) | Some(NodeStatus::Completed)
        ) {
            tracing::debug!(
                execution_id = %completion.execution_id,
                node_id = %completion.node_id,
                "dropping completion for terminal execution"
            );
            return Ok(());
        }

        if completion.success {
            self.state
                .set_node_status(
                    &completion.execution_id,
                    &completion.node_id,
                    NodeStatus::Completed,
                )
                .await?;
            if let Some(output) = &completion.output {
                let empty = output.as_object().map(|o| o.is_empty()).unwrap_or(false);
                if !empty {
                    self.state
                        .set_node_output(&completion.execution_id, &completion.node_id, output)
                        .await?;
                }
            }
        } else {
            self.state
                .set_node_status(
                    &completion.execution_id,
                    &completion.node_id,
                    NodeStatus::Failed,
                )
                .await?;
            if let Some(mut execution) = self
                .executions
                .get_by_id(&completion.execution_id)
                .await?
            {
                let error = completion.error.as_deref().unwrap_or("task failed");
                self.fail_execution(&mut execution, error).await?;
            }
            return Ok(());
        }

        self.dispatch_ready_nodes(&completion.execution_id).await
    }

    /// Find pending nodes whose dependencies are all satisfied, and dispatch
    /// each under its per-node lock. When no pending nodes remain and every
    /// node landed in COMPLETED/SKIPPED, seal the execution (re-checking the
    /// timeout so a run that beats its last node past the deadline records
    /// FAILED, not COMPLETED).
    pub async fn dispatch_ready_nodes(&self, execution_id: &str) -> Result<()> {
        let metadata = self.state.execution_metadata(execution_id).await?;
        let workflow_id = match metadata {
            Some(m) => m.workflow_id,
            None => match self.executions.get_by_id(execution_id).await? {
                Some(execution) => execution.workflow_id,
                None => return Ok(()),
            },
        };

        let dag = match self.workflow_dag(&workflow_id).await? {
            Some(dag) => dag,
            None => return Ok(()),
        };

        let node_statuses = self.state.all_node_statuses(execution_id).await?;
        let pending: Vec<&String> = node_statuses
            .iter()
            .filter(|(_, s)| **s == NodeStatus::Pending)
            .map(|(n, _)| n)
            .collect();

        if pending.is_empty() {
            if node_statuses
                .values()
                .all(|s| matches!(s, NodeStatus::Completed | NodeStatus::Skipped))
            {
                self.seal_completed(execution_id).await?;
            }
            return Ok(());
        }

        let outputs = self.state.all_outputs(execution_id).await?;
        for node_id in pending {
            let satisfied = dag.dependencies(node_id).iter().all(|dep| {
                matches!(
                    node_statuses.get(dep),
                    Some(NodeStatus::Completed) | Some(NodeStatus::Skipped)
                )
            });
            if !satisfied {
                continue;
            }

            let lock_key = format!("dispatch:{execution_id}:{node_id}");
            if !self.state.acquire_lock(&lock_key, self.lock_ttl).await? {
                // Another orchestrator is already dispatching this node
                continue;
            }

            let dispatch = self
                .dispatch_node(execution_id, node_id, &dag, &outputs)
                .await;
            self.state.release_lock(&lock_key).await?;
            dispatch?;
        }

        Ok(())
    }

    /// Critical region: re-check the node under the lock, evaluate its
    /// condition, then either skip it (waking downstream with a synthetic
    /// completion) or publish its task.
    async fn dispatch_node(
        &self,
        execution_id: &str,
        node_id: &str,
        dag: &Dag,
        outputs: &std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let current = self.state.node_status(execution_id, node_id).await?;
        if current != Some(NodeStatus::Pending) {
            return Ok(());
        }

        let node = match dag.node(node_id) {
            Some(node) => node,
            None => return Ok(()),
        };

        if !TemplateResolver::evaluate_condition(node.condition.as_deref(), outputs) {
            self.state
                .set_node_status(execution_id, node_id, NodeStatus::Skipped)
                .await?;
            // Synthetic success so downstream joins see this branch settled
            self.broker
                .publish_completion(&CompletionMessage::success(execution_id, node_id, None))
                .await?;
            tracing::info!(
                execution_id = %execution_id,
                node_id = %node_id,
                "condition false, node skipped"
            );
            return Ok(());
        }

        let resolved_config = TemplateResolver::resolve_config(&node.config, outputs);
        let task = TaskMessage::new(execution_id, node_id, &node.handler, resolved_config);

        self.state
            .set_node_status(execution_id, node_id, NodeStatus::Running)
            .await?;
        self.broker.publish_task(&task).await?;

        tracing::info!(
            execution_id = %execution_id,
            node_id = %node_id,
            handler = %node.handler,
            "task dispatched"
        );
        Ok(())
    }

    /// Completion tail: transition the execution to COMPLETED in both stores
    /// unless the deadline already passed.
    async fn seal_completed(&self, execution_id: &str) -> Result<()> {
        let mut execution = match self.executions.get_by_id(execution_id).await? {
            Some(execution) => execution,
            None => return Ok(()),
        };
        if execution.status == NodeStatus::Completed {
            return Ok(());
        }
        if self.check_timeout(&mut execution).await? {
            return Ok(());
        }

        execution.mark_complete();
        self.executions.update(&execution).await?;
        self.state
            .set_aggregate_status(execution_id, NodeStatus::Completed)
            .await?;
        tracing::info!(execution_id = %execution_id, "execution completed");
        Ok(())
    }

    /// Timeout sweep over all RUNNING executions in the cold store
    pub async fn sweep_timeouts(&self) -> Result<()> {
        let running = self.executions.list_running().await?;
        for mut execution in running {
            self.check_timeout(&mut execution).await?;
        }
        Ok(())
    }

    async fn check_timeout(&self, execution: &mut Execution) -> Result<bool> {
        if matches!(
            execution.status,
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Cancelled
        ) {
            return Ok(false);
        }

        if let (Some(timeout), Some(started_at)) = (execution.timeout_seconds, execution.started_at)
        {
            let elapsed = (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0;
            if elapsed > timeout {
                tracing::warn!(
                    execution_id = %execution.id,
                    elapsed_seconds = elapsed,
                    timeout_seconds = timeout,
                    "execution timed out"
                );
                self.fail_execution(execution, &format!("workflow timed out after {timeout}s"))
                    .await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Fail the execution in both stores and freeze every node still
    /// PENDING/RUNNING so nothing further dispatches for them.
    pub async fn fail_execution(&self, execution: &mut Execution, error: &str) -> Result<()> {
        execution.status = NodeStatus::Failed;
        self.executions.update(execution).await?;
        self.state
            .set_aggregate_status(&execution.id, NodeStatus::Failed)
            .await?;

        let node_statuses = self.state.all_node_statuses(&execution.id).await?;
        for (node_id, status) in node_statuses {
            if matches!(status, NodeStatus::Pending | NodeStatus::Running) {
                self.state
                    .set_node_status(&execution.id, &node_id, NodeStatus::Failed)
                    .await?;
            }
        }

        tracing::warn!(execution_id = %execution.id, error = %error, "execution failed");
        Ok(())
    }

    async fn workflow_dag(&self, workflow_id: &str) -> Result<Option<Arc<Dag>>> {
        if let Some(dag) = self.dag_cache.get(workflow_id).await {
            return Ok(Some(dag));
        }

        match self.workflows.get_by_id(workflow_id).await? {
            Some(workflow) => {
                let dag = Arc::new(Dag::from_value(&workflow.dag_json)?);
                self.dag_cache.insert(workflow_id, dag.clone()).await;
                Ok(Some(dag))
            }
            None => Ok(None),
        }
    }

    /// Test hook: resident DAG cache entries
    pub async fn dag_cache_entry_count(&self) -> u64 {
        self.dag_cache.entry_count().await
    }
}

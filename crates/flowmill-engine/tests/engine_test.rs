// Integration tests for the workflow engine
//
// These drive submit/trigger/orchestrate end-to-end over the in-memory
// backend, with an inline echo worker standing in for the worker pool.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

use flowmill_core::memory::InMemoryBackend;
use flowmill_core::{
    CompletionMessage, ExecutionRepository, MessageBroker, NodeStatus, StateStore, WorkflowError,
};
use flowmill_engine::{
    CancelWorkflow, GetWorkflowResults, GetWorkflowStatus, Orchestrator, OrchestratorConfig,
    SubmitWorkflow, TriggerExecution,
};

struct Harness {
    backend: InMemoryBackend,
    submit: SubmitWorkflow,
    trigger: TriggerExecution,
    orchestrator: Orchestrator,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(OrchestratorConfig::default())
    }

    fn with_config(config: OrchestratorConfig) -> Self {
        let backend = InMemoryBackend::new();
        let submit = SubmitWorkflow::new(
            backend.workflows.clone(),
            backend.executions.clone(),
            backend.state.clone(),
        );
        let trigger = TriggerExecution::new(
            backend.workflows.clone(),
            backend.executions.clone(),
            backend.state.clone(),
            backend.broker.clone(),
        );
        let orchestrator = Orchestrator::new(
            backend.workflows.clone(),
            backend.executions.clone(),
            backend.state.clone(),
            backend.broker.clone(),
            config,
        );
        Self {
            backend,
            submit,
            trigger,
            orchestrator,
        }
    }

    async fn submit_and_trigger(&self, dag: Value) -> (String, String) {
        let (workflow_id, execution_id) = self
            .submit
            .execute("test-workflow", dag, None)
            .await
            .unwrap();
        self.trigger.execute(&execution_id, None).await.unwrap();
        (workflow_id, execution_id)
    }

    /// Echo worker + orchestrator pump: run until no messages move
    async fn drive(&self) {
        for _ in 0..64 {
            let mut progressed = false;

            let tasks = self
                .backend
                .broker
                .consume_tasks("task_workers", "test-worker", 16, 0)
                .await
                .unwrap();
            for task in tasks {
                progressed = true;
                let completion = CompletionMessage::success(
                    &task.execution_id,
                    &task.node_id,
                    Some(json!({ "echo": task.node_id, "config": task.config })),
                );
                self.backend
                    .broker
                    .publish_completion(&completion)
                    .await
                    .unwrap();
                self.backend
                    .broker
                    .ack_task(task.stream_id.as_deref().unwrap())
                    .await
                    .unwrap();
            }

            let completions = self
                .backend
                .broker
                .consume_completions("orchestrators", "test-orchestrator", 16, 0)
                .await
                .unwrap();
            for completion in completions {
                progressed = true;
                self.orchestrator
                    .handle_completion(&completion)
                    .await
                    .unwrap();
                self.backend
                    .broker
                    .ack_completion(completion.stream_id.as_deref().unwrap())
                    .await
                    .unwrap();
            }

            if !progressed {
                return;
            }
        }
        panic!("engine did not settle within the round limit");
    }

    async fn aggregate(&self, execution_id: &str) -> Option<NodeStatus> {
        self.backend.state.aggregate_status(execution_id).await.unwrap()
    }

    async fn node_status(&self, execution_id: &str, node_id: &str) -> Option<NodeStatus> {
        self.backend
            .state
            .node_status(execution_id, node_id)
            .await
            .unwrap()
    }
}

fn linear_chain() -> Value {
    json!({
        "nodes": [
            {"id": "A", "handler": "echo", "dependencies": []},
            {"id": "B", "handler": "echo", "dependencies": ["A"]},
            {"id": "C", "handler": "echo", "dependencies": ["B"]},
        ]
    })
}

// ============================================================================
// Scenario: linear chain
// ============================================================================

#[tokio::test]
async fn test_linear_chain_completes_in_order() {
    let harness = Harness::new();
    let (_, execution_id) = harness.submit_and_trigger(linear_chain()).await;
    harness.drive().await;

    for node in ["A", "B", "C"] {
        assert_eq!(
            harness.node_status(&execution_id, node).await,
            Some(NodeStatus::Completed),
            "node {node}"
        );
    }
    assert_eq!(
        harness.aggregate(&execution_id).await,
        Some(NodeStatus::Completed)
    );

    // Dispatch respected the chain: A before B before C
    let tasks = harness.backend.broker.published_tasks().await;
    let order: Vec<&str> = tasks.iter().map(|t| t.node_id.as_str()).collect();
    assert_eq!(order, vec!["A", "B", "C"]);

    let outputs = harness
        .backend
        .state
        .all_outputs(&execution_id)
        .await
        .unwrap();
    for node in ["A", "B", "C"] {
        assert_eq!(outputs[node]["echo"], node);
    }

    let execution = harness
        .backend
        .executions
        .get_by_id(&execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, NodeStatus::Completed);
    assert!(execution.completed_at.is_some());
}

// ============================================================================
// Scenario: fan-out / fan-in
// ============================================================================

#[tokio::test]
async fn test_fan_out_fan_in_dispatches_join_once() {
    let harness = Harness::new();
    let (_, execution_id) = harness
        .submit_and_trigger(json!({
            "nodes": [
                {"id": "A", "handler": "echo", "dependencies": []},
                {"id": "B", "handler": "echo", "dependencies": ["A"]},
                {"id": "C", "handler": "echo", "dependencies": ["A"]},
                {"id": "D", "handler": "echo", "dependencies": ["A"]},
                {"id": "E", "handler": "echo", "dependencies": ["B", "C", "D"]},
            ]
        }))
        .await;
    harness.drive().await;

    for node in ["A", "B", "C", "D", "E"] {
        assert_eq!(
            harness.node_status(&execution_id, node).await,
            Some(NodeStatus::Completed),
            "node {node}"
        );
    }
    assert_eq!(
        harness.aggregate(&execution_id).await,
        Some(NodeStatus::Completed)
    );

    let tasks = harness.backend.broker.published_tasks().await;
    let join_dispatches = tasks.iter().filter(|t| t.node_id == "E").count();
    assert_eq!(join_dispatches, 1, "join node must dispatch exactly once");
}

// ============================================================================
// Scenario: cycle rejection
// ============================================================================

#[tokio::test]
async fn test_cycle_rejected_at_submit() {
    let harness = Harness::new();
    let err = harness
        .submit
        .execute(
            "cyclic",
            json!({
                "nodes": [
                    {"id": "A", "handler": "echo", "dependencies": ["B"]},
                    {"id": "B", "handler": "echo", "dependencies": ["A"]},
                ]
            }),
            None,
        )
        .await
        .unwrap_err();

    match err {
        WorkflowError::CyclicDependency(nodes) => {
            let mut nodes = nodes;
            nodes.sort();
            assert_eq!(nodes, vec!["A".to_string(), "B".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }

    // Nothing persisted
    assert_eq!(harness.backend.workflows.count().await, 0);
    assert_eq!(harness.backend.executions.count().await, 0);
}

// ============================================================================
// Scenario: fan-in race
// ============================================================================

#[tokio::test]
async fn test_concurrent_completions_dispatch_join_once() {
    let harness = Harness::new();
    let (_, execution_id) = harness
        .submit_and_trigger(json!({
            "nodes": [
                {"id": "A", "handler": "echo", "dependencies": []},
                {"id": "B", "handler": "echo", "dependencies": []},
                {"id": "C", "handler": "echo", "dependencies": ["A", "B"]},
            ]
        }))
        .await;

    // Drain the two root tasks without completing them yet
    let roots = harness
        .backend
        .broker
        .consume_tasks("task_workers", "test-worker", 16, 0)
        .await
        .unwrap();
    assert_eq!(roots.len(), 2);

    // Two orchestrator consumers handle A's and B's completions concurrently
    let a = CompletionMessage::success(&execution_id, "A", Some(json!({"v": "a"})));
    let b = CompletionMessage::success(&execution_id, "B", Some(json!({"v": "b"})));
    let (ra, rb) = tokio::join!(
        harness.orchestrator.handle_completion(&a),
        harness.orchestrator.handle_completion(&b),
    );
    ra.unwrap();
    rb.unwrap();

    let tasks = harness.backend.broker.published_tasks().await;
    let join_dispatches = tasks.iter().filter(|t| t.node_id == "C").count();
    assert_eq!(join_dispatches, 1, "lock must prevent double dispatch");
    assert_eq!(
        harness.node_status(&execution_id, "C").await,
        Some(NodeStatus::Running)
    );
}

// ============================================================================
// Terminal absorption
// ============================================================================

#[tokio::test]
async fn test_terminal_execution_ignores_late_completions() {
    let harness = Harness::new();
    let (_, execution_id) = harness.submit_and_trigger(linear_chain()).await;

    // Fail the run while A is in flight
    let failure = CompletionMessage::failure(&execution_id, "A", "handler exploded");
    harness.orchestrator.handle_completion(&failure).await.unwrap();

    assert_eq!(
        harness.aggregate(&execution_id).await,
        Some(NodeStatus::Failed)
    );
    assert_eq!(
        harness.node_status(&execution_id, "B").await,
        Some(NodeStatus::Failed)
    );

    let tasks_before = harness.backend.broker.published_tasks().await.len();

    // A late success for A must not resurrect the run or dispatch B
    let late = CompletionMessage::success(&execution_id, "A", Some(json!({"v": 1})));
    harness.orchestrator.handle_completion(&late).await.unwrap();

    assert_eq!(
        harness.node_status(&execution_id, "A").await,
        Some(NodeStatus::Failed)
    );
    assert_eq!(
        harness.aggregate(&execution_id).await,
        Some(NodeStatus::Failed)
    );
    assert_eq!(
        harness.backend.broker.published_tasks().await.len(),
        tasks_before
    );
}

#[tokio::test]
async fn test_failure_completion_fails_execution() {
    let harness = Harness::new();
    let (_, execution_id) = harness.submit_and_trigger(linear_chain()).await;

    let failure = CompletionMessage::failure(&execution_id, "A", "boom");
    harness.orchestrator.handle_completion(&failure).await.unwrap();

    let execution = harness
        .backend
        .executions
        .get_by_id(&execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, NodeStatus::Failed);
    assert_eq!(
        harness.node_status(&execution_id, "A").await,
        Some(NodeStatus::Failed)
    );
}

// ============================================================================
// Timeout dominance
// ============================================================================

#[tokio::test]
async fn test_sweeper_fails_overdue_execution() {
    let harness = Harness::new();
    let (_, execution_id) = harness
        .submit
        .execute("slow", linear_chain(), Some(0.1))
        .await
        .unwrap();
    harness.trigger.execute(&execution_id, None).await.unwrap();

    // Backdate the start so the deadline has passed
    let mut execution = harness
        .backend
        .executions
        .get_by_id(&execution_id)
        .await
        .unwrap()
        .unwrap();
    execution.started_at = Some(Utc::now() - ChronoDuration::seconds(10));
    harness.backend.executions.update(&execution).await.unwrap();

    harness.orchestrator.sweep_timeouts().await.unwrap();

    assert_eq!(
        harness.aggregate(&execution_id).await,
        Some(NodeStatus::Failed)
    );
    assert_eq!(
        harness.node_status(&execution_id, "A").await,
        Some(NodeStatus::Failed)
    );
    let execution = harness
        .backend
        .executions
        .get_by_id(&execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, NodeStatus::Failed);
}

#[tokio::test]
async fn test_late_success_past_deadline_records_failed() {
    let harness = Harness::new();
    let (_, execution_id) = harness
        .submit
        .execute(
            "slow",
            json!({
                "nodes": [{"id": "A", "handler": "echo", "dependencies": []}]
            }),
            Some(0.1),
        )
        .await
        .unwrap();
    harness.trigger.execute(&execution_id, None).await.unwrap();

    let mut execution = harness
        .backend
        .executions
        .get_by_id(&execution_id)
        .await
        .unwrap()
        .unwrap();
    execution.started_at = Some(Utc::now() - ChronoDuration::seconds(10));
    harness.backend.executions.update(&execution).await.unwrap();

    // The last node reports success after the deadline: the completion tail
    // must record FAILED, not COMPLETED
    let late = CompletionMessage::success(&execution_id, "A", Some(json!({"v": 1})));
    harness.orchestrator.handle_completion(&late).await.unwrap();

    let execution = harness
        .backend
        .executions
        .get_by_id(&execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, NodeStatus::Failed);
    assert_eq!(
        harness.aggregate(&execution_id).await,
        Some(NodeStatus::Failed)
    );
}

// ============================================================================
// Conditions
// ============================================================================

#[tokio::test]
async fn test_false_condition_skips_node_and_wakes_downstream() {
    let harness = Harness::new();
    let (_, execution_id) = harness
        .submit_and_trigger(json!({
            "nodes": [
                {"id": "A", "handler": "echo", "dependencies": []},
                {
                    "id": "B",
                    "handler": "echo",
                    "dependencies": ["A"],
                    "condition": "{{ A.echo }} == something-else"
                },
                {"id": "C", "handler": "echo", "dependencies": ["B"]},
            ]
        }))
        .await;
    harness.drive().await;

    assert_eq!(
        harness.node_status(&execution_id, "A").await,
        Some(NodeStatus::Completed)
    );
    assert_eq!(
        harness.node_status(&execution_id, "B").await,
        Some(NodeStatus::Skipped)
    );
    // The skip's synthetic completion woke C
    assert_eq!(
        harness.node_status(&execution_id, "C").await,
        Some(NodeStatus::Completed)
    );
    assert_eq!(
        harness.aggregate(&execution_id).await,
        Some(NodeStatus::Completed)
    );

    // B never reached the task stream
    let tasks = harness.backend.broker.published_tasks().await;
    assert!(tasks.iter().all(|t| t.node_id != "B"));
}

#[tokio::test]
async fn test_true_condition_dispatches_normally() {
    let harness = Harness::new();
    let (_, execution_id) = harness
        .submit_and_trigger(json!({
            "nodes": [
                {"id": "A", "handler": "echo", "dependencies": []},
                {
                    "id": "B",
                    "handler": "echo",
                    "dependencies": ["A"],
                    "condition": "{{ A.echo }} == A"
                },
            ]
        }))
        .await;
    harness.drive().await;

    assert_eq!(
        harness.node_status(&execution_id, "B").await,
        Some(NodeStatus::Completed)
    );
}

// ============================================================================
// Template data flow
// ============================================================================

#[tokio::test]
async fn test_downstream_config_sees_upstream_output() {
    let harness = Harness::new();
    harness
        .submit_and_trigger(json!({
            "nodes": [
                {"id": "A", "handler": "echo", "dependencies": []},
                {
                    "id": "B",
                    "handler": "echo",
                    "dependencies": ["A"],
                    "config": {"upstream": "{{ A.echo }}"}
                },
            ]
        }))
        .await;
    harness.drive().await;

    let tasks = harness.backend.broker.published_tasks().await;
    let b_task = tasks.iter().find(|t| t.node_id == "B").unwrap();
    assert_eq!(b_task.config["upstream"], "A");
}

// ============================================================================
// Cancel
// ============================================================================

#[tokio::test]
async fn test_cancel_freezes_execution() {
    let harness = Harness::new();
    let (_, execution_id) = harness.submit_and_trigger(linear_chain()).await;

    let cancel = CancelWorkflow::new(
        harness.backend.executions.clone(),
        harness.backend.state.clone(),
    );
    cancel.execute(&execution_id).await.unwrap();

    assert_eq!(
        harness.aggregate(&execution_id).await,
        Some(NodeStatus::Cancelled)
    );
    assert_eq!(
        harness.node_status(&execution_id, "A").await,
        Some(NodeStatus::Cancelled)
    );
    assert_eq!(
        harness.node_status(&execution_id, "B").await,
        Some(NodeStatus::Cancelled)
    );

    // Late worker completion for A is discarded
    let tasks_before = harness.backend.broker.published_tasks().await.len();
    let late = CompletionMessage::success(&execution_id, "A", Some(json!({"v": 1})));
    harness.orchestrator.handle_completion(&late).await.unwrap();
    assert_eq!(
        harness.node_status(&execution_id, "A").await,
        Some(NodeStatus::Cancelled)
    );
    assert_eq!(
        harness.backend.broker.published_tasks().await.len(),
        tasks_before
    );

    let err = cancel.execute("missing-execution").await.unwrap_err();
    assert!(matches!(err, WorkflowError::ExecutionNotFound(_)));
}

// ============================================================================
// Status / results queries
// ============================================================================

#[tokio::test]
async fn test_status_reads_hot_path_and_cold_fallback() {
    let harness = Harness::new();
    let (workflow_id, execution_id) = harness.submit_and_trigger(linear_chain()).await;
    harness.drive().await;

    let status = GetWorkflowStatus::new(
        harness.backend.executions.clone(),
        harness.backend.state.clone(),
    );

    let view = status.execute(&execution_id).await.unwrap();
    assert_eq!(view.status, NodeStatus::Completed);
    assert_eq!(view.workflow_id, workflow_id);
    assert_eq!(view.node_statuses.len(), 3);

    // Hot shadow expired: fall back to the cold store
    harness.backend.state.expire_execution(&execution_id).await;
    let view = status.execute(&execution_id).await.unwrap();
    assert_eq!(view.workflow_id, workflow_id);
    // Node statuses are gone with the hot state; the cold row still answers
    assert_eq!(view.status, NodeStatus::Pending);
    assert!(view.node_statuses.is_empty());

    let err = status.execute("missing").await.unwrap_err();
    assert!(matches!(err, WorkflowError::ExecutionNotFound(_)));
}

#[tokio::test]
async fn test_results_returns_outputs() {
    let harness = Harness::new();
    let (_, execution_id) = harness.submit_and_trigger(linear_chain()).await;
    harness.drive().await;

    let results = GetWorkflowResults::new(
        harness.backend.executions.clone(),
        harness.backend.state.clone(),
    );
    let view = results.execute(&execution_id).await.unwrap();
    assert_eq!(view.outputs.len(), 3);
    assert_eq!(view.outputs["C"]["echo"], "C");
}

// ============================================================================
// Runtime params
// ============================================================================

#[tokio::test]
async fn test_trigger_params_resolve_into_root_config() {
    let harness = Harness::new();
    let (_, execution_id) = harness
        .submit
        .execute(
            "parametrized",
            json!({
                "nodes": [
                    {
                        "id": "A",
                        "handler": "echo",
                        "dependencies": [],
                        "config": {"greeting": "hello {{ params.name }}"}
                    }
                ]
            }),
            None,
        )
        .await
        .unwrap();
    harness
        .trigger
        .execute(&execution_id, Some(json!({"name": "world"})))
        .await
        .unwrap();

    let tasks = harness.backend.broker.published_tasks().await;
    assert_eq!(tasks[0].config["greeting"], "hello world");
}

// ============================================================================
// DAG cache bound
// ============================================================================

#[tokio::test]
async fn test_dag_cache_stays_bounded() {
    let harness = Harness::with_config(OrchestratorConfig {
        dag_cache_max_size: 2,
        ..OrchestratorConfig::default()
    });

    for i in 0..5 {
        let (_, execution_id) = harness
            .submit_and_trigger(json!({
                "nodes": [
                    {"id": format!("N{i}"), "handler": "echo", "dependencies": []}
                ]
            }))
            .await;
        harness.drive().await;
        assert_eq!(
            harness.aggregate(&execution_id).await,
            Some(NodeStatus::Completed)
        );
    }

    assert!(harness.orchestrator.dag_cache_entry_count().await <= 2);
}

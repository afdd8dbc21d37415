// Integration test for the orchestrator runner loop

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use flowmill_core::memory::InMemoryBackend;
use flowmill_core::{MessageBroker, NodeStatus, Settings, StateStore};
use flowmill_engine::{Orchestrator, OrchestratorConfig, SubmitWorkflow, TriggerExecution};
use flowmill_orchestrator::OrchestratorRunner;

#[tokio::test]
async fn test_runner_progresses_execution_and_acks() {
    let backend = InMemoryBackend::new();
    let settings = Arc::new(Settings {
        orchestrator_block_ms: 20,
        ..Settings::default()
    });

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
    let orchestrator = Arc::new(Orchestrator::new(
        backend.workflows.clone(),
        backend.executions.clone(),
        backend.state.clone(),
        backend.broker.clone(),
        OrchestratorConfig::default(),
    ));

    let (_, execution_id) = submit
        .execute(
            "two-step",
            json!({
                "nodes": [
                    {"id": "A", "handler": "echo", "dependencies": []},
                    {"id": "B", "handler": "echo", "dependencies": ["A"]},
                ]
            }),
            None,
        )
        .await
        .unwrap();
    trigger.execute(&execution_id, None).await.unwrap();

    let runner = OrchestratorRunner::new(backend.broker.clone(), orchestrator, settings);
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(runner.run(rx));

    // Stand in for a worker: complete A, let the runner dispatch B, complete B
    for expected_node in ["A", "B"] {
        let task = loop {
            let mut tasks = backend
                .broker
                .consume_tasks("task_workers", "test-worker", 1, 0)
                .await
                .unwrap();
            if let Some(task) = tasks.pop() {
                break task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(task.node_id, expected_node);

        backend
            .broker
            .publish_completion(&flowmill_core::CompletionMessage::success(
                &task.execution_id,
                &task.node_id,
                Some(json!({"done": task.node_id})),
            ))
            .await
            .unwrap();
        backend
            .broker
            .ack_task(task.stream_id.as_deref().unwrap())
            .await
            .unwrap();
    }

    // The runner settles the execution and acks every completion
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let aggregate = backend
            .state
            .aggregate_status(&execution_id)
            .await
            .unwrap();
        if aggregate == Some(NodeStatus::Completed)
            && backend.broker.pending_completion_count().await == 0
        {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "execution did not complete in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("runner must stop")
        .unwrap()
        .unwrap();
}

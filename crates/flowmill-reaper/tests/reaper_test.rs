// Integration tests for the reaper: resurrect-and-bury of stranded tasks

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use flowmill_core::memory::InMemoryBackend;
use flowmill_core::{MessageBroker, Settings, TaskMessage};
use flowmill_reaper::Reaper;

fn settings() -> Settings {
    Settings {
        reaper_min_idle_seconds: 300,
        reaper_batch_size: 10,
        ..Settings::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_reaper_resurrects_stranded_task() {
    let backend = InMemoryBackend::new();
    let reaper = Reaper::new(backend.broker.clone(), &settings());

    // A worker consumes the task and crashes without acking
    let task = TaskMessage::new("e1", "n1", "echo", json!({"k": 1}));
    backend.broker.publish_task(&task).await.unwrap();
    let delivered = backend
        .broker
        .consume_tasks("task_workers", "doomed-worker", 10, 0)
        .await
        .unwrap();
    assert_eq!(delivered.len(), 1);
    let original_stream_id = delivered[0].stream_id.clone().unwrap();

    // Idle past the threshold
    tokio::time::advance(Duration::from_secs(301)).await;

    let resurrected = reaper.run_once().await.unwrap();
    assert_eq!(resurrected, 1);

    // Same task id republished under a new stream id; original acked
    let published = backend.broker.published_tasks().await;
    assert_eq!(published.len(), 2);
    assert_eq!(published[1].id, task.id);

    let redelivered = backend
        .broker
        .consume_tasks("task_workers", "healthy-worker", 10, 0)
        .await
        .unwrap();
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].id, task.id);
    assert_ne!(
        redelivered[0].stream_id.as_deref().unwrap(),
        original_stream_id
    );
}

#[tokio::test(start_paused = true)]
async fn test_reaper_ignores_fresh_and_acked_deliveries() {
    let backend = InMemoryBackend::new();
    let reaper = Reaper::new(backend.broker.clone(), &settings());

    // One task acked properly, one still fresh in flight
    let done = TaskMessage::new("e1", "done", "echo", json!({}));
    backend.broker.publish_task(&done).await.unwrap();
    let delivered = backend
        .broker
        .consume_tasks("task_workers", "w", 10, 0)
        .await
        .unwrap();
    backend
        .broker
        .ack_task(delivered[0].stream_id.as_deref().unwrap())
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(301)).await;

    let fresh = TaskMessage::new("e1", "fresh", "echo", json!({}));
    backend.broker.publish_task(&fresh).await.unwrap();
    backend
        .broker
        .consume_tasks("task_workers", "w", 10, 0)
        .await
        .unwrap();

    // Acked entry is gone, fresh entry is under the idle threshold
    assert_eq!(reaper.run_once().await.unwrap(), 0);
    assert_eq!(backend.broker.published_tasks().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reaper_respects_batch_size() {
    let backend = InMemoryBackend::new();
    let reaper = Reaper::new(
        backend.broker.clone(),
        &Settings {
            reaper_batch_size: 2,
            ..settings()
        },
    );

    for i in 0..5 {
        backend
            .broker
            .publish_task(&TaskMessage::new("e1", format!("n{i}"), "echo", json!({})))
            .await
            .unwrap();
    }
    backend
        .broker
        .consume_tasks("task_workers", "doomed", 10, 0)
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(301)).await;

    // Bounded to batch_size per cycle; repeated cycles drain the backlog
    assert_eq!(reaper.run_once().await.unwrap(), 2);
    assert_eq!(reaper.run_once().await.unwrap(), 2);
    assert_eq!(reaper.run_once().await.unwrap(), 1);
    assert_eq!(reaper.run_once().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reaper_loop_runs_on_interval_and_stops() {
    let backend = InMemoryBackend::new();
    let reaper = Reaper::new(backend.broker.clone(), &settings());

    backend
        .broker
        .publish_task(&TaskMessage::new("e1", "n1", "echo", json!({})))
        .await
        .unwrap();
    backend
        .broker
        .consume_tasks("task_workers", "doomed", 10, 0)
        .await
        .unwrap();

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(reaper.run(rx));

    // First cycle finds nothing (fresh); after the idle threshold the loop
    // fires again and resurrects
    tokio::time::advance(Duration::from_secs(301)).await;
    tokio::time::sleep(Duration::from_secs(61)).await;

    let published = backend.broker.published_tasks().await;
    assert_eq!(published.len(), 2);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(120), handle)
        .await
        .expect("reaper must stop")
        .unwrap()
        .unwrap();
}

// Worker runtime
//
// Consumes task batches from the task stream and processes each task in its
// own spawned task. The resilience sequence per task:
//
// 1. Idempotency: a task id already in the execution's processed set is
//    acked and dropped.
// 2. Unknown handler: logged; the delivery stays in the pending-entry list
//    for the reaper/operator unless WORKER_ACK_UNKNOWN_HANDLER is set.
// 3. Success: publish a success completion, mark the id processed, ack.
// 4. Failure with retries left: increment the retry counter, sleep the
//    backoff, republish the same task id, ack this delivery - and publish
//    NO completion, so the orchestrator never sees intermediate failures.
// 5. Retries exhausted: DLQ entry, failure completion, mark processed, ack.
//
// Acks always come after the side effects they cover have committed; a crash
// mid-handler leaves the delivery unacked for the reaper.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use flowmill_core::{
    CompletionMessage, DeadLetterEntry, DlqRepository, HandlerRegistry, MessageBroker, Result,
    Settings, StateStore, TaskMessage,
};

pub struct WorkerRunner {
    broker: Arc<dyn MessageBroker>,
    state: Arc<dyn StateStore>,
    dlq: Arc<dyn DlqRepository>,
    handlers: Arc<HandlerRegistry>,
    settings: Arc<Settings>,
    consumer_name: String,
}

impl WorkerRunner {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        state: Arc<dyn StateStore>,
        dlq: Arc<dyn DlqRepository>,
        handlers: HandlerRegistry,
        settings: Arc<Settings>,
    ) -> Arc<Self> {
        Arc::new(Self {
            broker,
            state,
            dlq,
            handlers: Arc::new(handlers),
            settings,
            consumer_name: format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]),
        })
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Run until the shutdown signal flips, then drain in-flight tasks with a
    /// bounded deadline and abort stragglers.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            consumer_name = %self.consumer_name,
            handlers = ?self.handlers.names(),
            "worker starting"
        );
        self.broker.create_consumer_groups().await?;

        let mut inflight: JoinSet<()> = JoinSet::new();

        loop {
            // Reap finished handler tasks without blocking
            while inflight.try_join_next().is_some() {}

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                consumed = self.broker.consume_tasks(
                    &self.settings.task_group,
                    &self.consumer_name,
                    self.settings.worker_batch_size,
                    self.settings.worker_block_ms,
                ) => {
                    match consumed {
                        Ok(tasks) => {
                            for task in tasks {
                                let runner = self.clone();
                                inflight.spawn(async move {
                                    if let Err(e) = runner.process_task(&task).await {
                                        error!(
                                            execution_id = %task.execution_id,
                                            node_id = %task.node_id,
                                            error = %e,
                                            "task processing error"
                                        );
                                    }
                                });
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "worker consume error");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }

        info!("shutdown signal received, draining in-flight tasks");
        let drain = async {
            while inflight.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.settings.worker_drain_timeout(), drain)
            .await
            .is_err()
        {
            warn!("drain deadline exceeded, aborting remaining tasks");
            inflight.abort_all();
        }
        info!("worker shutdown complete");
        Ok(())
    }

    /// Execute a single task with the full resilience sequence
    pub async fn process_task(&self, task: &TaskMessage) -> Result<()> {
        if self
            .state
            .is_task_processed(&task.execution_id, &task.id)
            .await?
        {
            info!(task_id = %task.id, "skipping duplicate task");
            self.ack(task).await?;
            return Ok(());
        }

        let handler = match self.handlers.get(&task.handler) {
            Some(handler) => handler,
            None => {
                error!(handler = %task.handler, task_id = %task.id, "handler not found");
                if self.settings.worker_ack_unknown_handler {
                    self.ack(task).await?;
                }
                return Ok(());
            }
        };

        info!(
            execution_id = %task.execution_id,
            node_id = %task.node_id,
            handler = %task.handler,
            "processing task"
        );

        let completion = match handler.process(task).await {
            Ok(output) => CompletionMessage::success(
                &task.execution_id,
                &task.node_id,
                Some(output),
            ),
            Err(e) => {
                error!(
                    execution_id = %task.execution_id,
                    node_id = %task.node_id,
                    error = %e,
                    "task failed"
                );

                if self.settings.dlq_enabled {
                    let failures = self
                        .state
                        .increment_retry(&task.execution_id, &task.node_id)
                        .await?;
                    let retries_done = failures.saturating_sub(1);

                    if retries_done < self.settings.max_retries {
                        let delay = self.backoff_delay(failures);
                        info!(
                            retry = failures,
                            max_retries = self.settings.max_retries,
                            delay_seconds = delay.as_secs_f64(),
                            "task failure, retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                        self.broker.publish_task(&task.for_republish()).await?;
                        self.ack(task).await?;
                        return Ok(());
                    }

                    let entry = DeadLetterEntry::from_task(task, e.to_string(), failures);
                    self.dlq.push(&entry).await?;
                    warn!(
                        task_id = %task.id,
                        retry_count = failures,
                        dlq_entry = %entry.id,
                        "retries exhausted, task moved to dlq"
                    );
                }

                CompletionMessage::failure(&task.execution_id, &task.node_id, e.to_string())
            }
        };

        self.broker.publish_completion(&completion).await?;
        self.state
            .mark_task_processed(&task.execution_id, &task.id)
            .await?;
        self.ack(task).await?;
        Ok(())
    }

    /// `min(base * 2^(n-1), cap)` scaled by a uniform jitter in
    /// `[1, 1 + jitter_max]`. Jitter spreads simultaneous retries apart.
    fn backoff_delay(&self, failures: u32) -> Duration {
        let base = self.settings.backoff_base_seconds;
        let cap = self.settings.backoff_cap_seconds;
        let exponential = (base * 2f64.powi(failures.saturating_sub(1) as i32)).min(cap);
        let jitter = rand::thread_rng().gen_range(0.0..=self.settings.backoff_jitter_max.max(0.0));
        Duration::from_secs_f64(exponential * (1.0 + jitter))
    }

    async fn ack(&self, task: &TaskMessage) -> Result<()> {
        if let Some(stream_id) = &task.stream_id {
            self.broker.ack_task(stream_id).await?;
        }
        Ok(())
    }
}

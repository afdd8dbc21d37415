// Orchestrator process runner
//
// Dual loop: the main loop consumes completion batches and handles them
// concurrently; a second task sweeps cold-store timeouts on a fixed period.
// A completion is acked only after its handling committed, so failures leave
// the message in the pending-entry list for replay.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

use flowmill_core::{CompletionMessage, MessageBroker, Result, Settings};
use flowmill_engine::Orchestrator;

pub struct OrchestratorRunner {
    broker: Arc<dyn MessageBroker>,
    orchestrator: Arc<Orchestrator>,
    settings: Arc<Settings>,
    consumer_name: String,
}

impl OrchestratorRunner {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        orchestrator: Arc<Orchestrator>,
        settings: Arc<Settings>,
    ) -> Arc<Self> {
        Arc::new(Self {
            broker,
            orchestrator,
            settings,
            consumer_name: format!(
                "orchestrator-{}",
                &Uuid::new_v4().simple().to_string()[..8]
            ),
        })
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(consumer_name = %self.consumer_name, "orchestrator starting");
        self.broker.create_consumer_groups().await?;

        let sweeper = tokio::spawn(
            self.clone()
                .sweep_loop(shutdown.clone(), self.settings.timeout_check_interval()),
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                consumed = self.broker.consume_completions(
                    &self.settings.completion_group,
                    &self.consumer_name,
                    self.settings.orchestrator_batch_size,
                    self.settings.orchestrator_block_ms,
                ) => {
                    match consumed {
                        Ok(completions) => {
                            join_all(
                                completions
                                    .iter()
                                    .map(|completion| self.handle_one(completion)),
                            )
                            .await;
                        }
                        Err(e) => {
                            error!(error = %e, "orchestrator consume error");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }

        sweeper.abort();
        let _ = sweeper.await;
        info!("orchestrator shutdown complete");
        Ok(())
    }

    /// Handle one completion and ack it only on success; an error keeps the
    /// delivery pending for replay.
    async fn handle_one(&self, completion: &CompletionMessage) {
        match self.orchestrator.handle_completion(completion).await {
            Ok(()) => {
                if let Some(stream_id) = &completion.stream_id {
                    if let Err(e) = self.broker.ack_completion(stream_id).await {
                        error!(
                            completion_id = %completion.id,
                            error = %e,
                            "completion ack failed"
                        );
                    }
                }
            }
            Err(e) => {
                error!(
                    completion_id = %completion.id,
                    execution_id = %completion.execution_id,
                    error = %e,
                    "completion handling failed, leaving delivery pending"
                );
            }
        }
    }

    async fn sweep_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>, interval: Duration) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.orchestrator.sweep_timeouts().await {
                        error!(error = %e, "timeout sweep error");
                    }
                }
            }
        }
    }
}
